// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Service records and framing constants shared by both ends of a link.

use uuid::Uuid;

/// Service record UUID for secure (authenticated) channels.
/// This is the standard Serial Port Profile UUID.
pub const SECURE_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Service record UUID for insecure channels.
pub const INSECURE_SERVICE_UUID: Uuid = Uuid::from_u128(0x8ce255c0_200a_11e0_ac64_0800200c9a66);

/// SDP record name for the secure service.
pub const SECURE_SERVICE_NAME: &str = "BluetoothChatSecure";

/// SDP record name for the insecure service.
pub const INSECURE_SERVICE_NAME: &str = "BluetoothChatInsecure";

/// Framing constants.
pub mod framing {
    /// Message delimiter (ASCII carriage return).
    pub const DELIMITER: u8 = 0x0D;

    /// Default upper bound for a single message, delimiter excluded.
    pub const MAX_MESSAGE_LEN: usize = 1024;
}

/// Toast texts surfaced to the caller.
pub mod toast {
    pub const TRANSPORT_UNAVAILABLE: &str = "Bluetooth not on";
    pub const CONNECT_FAILED: &str = "Unable to connect device";
    pub const CONNECTION_LOST: &str = "Device connection was lost";
    pub const WRITE_FAILED: &str = "Unable to write to device";
    pub const DISCOVERY_STOPPED: &str = "Discovery stopped";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            SECURE_SERVICE_UUID.to_string().to_lowercase(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            INSECURE_SERVICE_UUID.to_string().to_lowercase(),
            "8ce255c0-200a-11e0-ac64-0800200c9a66"
        );
        assert_ne!(SECURE_SERVICE_UUID, INSECURE_SERVICE_UUID);
    }

    #[test]
    fn test_delimiter_is_carriage_return() {
        assert_eq!(framing::DELIMITER, b'\r');
    }
}
