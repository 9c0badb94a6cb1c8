// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! An in-memory MQTT 3.1.1 broker. The binary entry point lives in
//! `src/bin/mqttd.rs`; this crate root exposes the pieces it wires together.

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod retained;
pub mod sender;
pub mod session;
pub mod session_manager;
pub mod state;
pub mod subscriptions;
