// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::DecodeError;

/// Length of a server-synthesized client identifier \[MQTT-3.1.3-6\].
const GENERATED_CLIENT_ID_LEN: usize = 23;

/// Convert wire bytes into an MQTT UTF-8 string, enforcing the 1.5.3 rules:
/// valid UTF-8 (which rejects overlong/non-shortest-form sequences) and no
/// embedded `U+0000`.
pub fn bytes_to_mqtt_string(bytes: &[u8]) -> Result<String, DecodeError> {
    let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidString)?;
    if s.contains('\u{0000}') {
        return Err(DecodeError::InvalidString);
    }
    Ok(s.to_string())
}

/// Generate a random alphanumeric client id for clients that connect with
/// `clean_session = true` and an empty client-id field \[MQTT-3.1.3-6\].
#[must_use]
pub fn random_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_embedded_nul() {
        assert_eq!(
            bytes_to_mqtt_string(b"a\0b"),
            Err(DecodeError::InvalidString)
        );
    }

    #[test]
    fn test_random_client_id_len() {
        assert_eq!(random_client_id().len(), GENERATED_CLIENT_ID_LEN);
    }
}
