// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Shared broker state threaded from the process entry point (C12) into
//! every connection task. Deliberately an explicit context object rather
//! than a process-wide singleton (§9).

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::retained::RetainedStore;
use crate::session_manager::SessionManager;
use crate::subscriptions::SubscriptionIndex;

pub struct BrokerState {
    pub config: Config,
    pub sessions: SessionManager,
    pub subscriptions: SubscriptionIndex,
    pub retained: RetainedStore,
    pub authenticator: Box<dyn Authenticator>,
}

impl BrokerState {
    #[must_use]
    pub fn new(config: Config, authenticator: Box<dyn Authenticator>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionManager::new(),
            subscriptions: SubscriptionIndex::new(),
            retained: RetainedStore::new(),
            authenticator,
        })
    }
}
