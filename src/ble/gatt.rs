//! mdoc BLE GATT service/characteristic layout, per ISO 18013-5 §8.3.3.1.1.
//!
//! This module only describes the profile; [`crate::ble::peripheral`] and
//! [`crate::ble::central`] are the ones that actually talk to a radio.

use uuid::Uuid;

/// Bitflags mirroring GATT characteristic properties relevant to the mdoc profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub notify: bool,
    pub write: bool,
    pub write_without_response: bool,
}

impl CharacteristicProperties {
    const fn none() -> Self {
        Self {
            read: false,
            notify: false,
            write: false,
            write_without_response: false,
        }
    }

    const fn read_only() -> Self {
        Self {
            read: true,
            ..Self::none()
        }
    }

    const fn notify_only() -> Self {
        Self {
            notify: true,
            ..Self::none()
        }
    }

    const fn write_any() -> Self {
        Self {
            write: true,
            write_without_response: true,
            ..Self::none()
        }
    }
}

/// One characteristic in the mdoc GATT service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicSpec {
    pub name: &'static str,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// The five well-known characteristic suffixes defined by ISO 18013-5 §8.3.3.1.1,
/// laid over a service UUID.
///
/// State and Client2Server/Server2Client/Ident UUIDs are derived by incrementing the
/// service UUID's last byte, matching the base "data transfer" layout used by every
/// ISO 18013-5 BLE implementation; a real deployment pins these to the exact
/// registered UUIDs rather than deriving them, which this type also supports via
/// [`GattProfile::with_uuids`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub service_uuid: Uuid,
    pub state: Uuid,
    pub client_to_server: Uuid,
    pub server_to_client: Uuid,
    pub ident: Uuid,
    pub l2cap_psm: Option<Uuid>,
}

/// State-characteristic byte meaning "start the session" (client → server write).
pub const STATE_START: u8 = 0x01;
/// State-characteristic byte meaning "end the session".
pub const STATE_END: u8 = 0x02;

impl GattProfile {
    /// Builds a profile from a service UUID using the standard mdoc characteristic
    /// offsets (service UUID's bytes with the last byte bumped by 1..4).
    pub fn derive_from_service_uuid(service_uuid: Uuid) -> Self {
        let bump = |n: u8| {
            let mut bytes = *service_uuid.as_bytes();
            bytes[15] = bytes[15].wrapping_add(n);
            Uuid::from_bytes(bytes)
        };
        Self {
            service_uuid,
            state: bump(1),
            client_to_server: bump(2),
            server_to_client: bump(3),
            ident: bump(4),
            l2cap_psm: Some(bump(5)),
        }
    }

    /// Builds a profile from explicit, already-registered UUIDs.
    pub fn with_uuids(
        service_uuid: Uuid,
        state: Uuid,
        client_to_server: Uuid,
        server_to_client: Uuid,
        ident: Uuid,
        l2cap_psm: Option<Uuid>,
    ) -> Self {
        Self {
            service_uuid,
            state,
            client_to_server,
            server_to_client,
            ident,
            l2cap_psm,
        }
    }

    /// Characteristic specs as seen from the Holder-Peripheral / Reader-Central
    /// perspective: State and Server2Client notify, Client2Server is written to,
    /// Ident and PSM are read.
    pub fn characteristics(&self) -> Vec<CharacteristicSpec> {
        let mut specs = vec![
            CharacteristicSpec {
                name: "state",
                uuid: self.state,
                properties: CharacteristicProperties::notify_only(),
            },
            CharacteristicSpec {
                name: "client2server",
                uuid: self.client_to_server,
                properties: CharacteristicProperties::write_any(),
            },
            CharacteristicSpec {
                name: "server2client",
                uuid: self.server_to_client,
                properties: CharacteristicProperties::notify_only(),
            },
            CharacteristicSpec {
                name: "ident",
                uuid: self.ident,
                properties: CharacteristicProperties::read_only(),
            },
        ];
        if let Some(psm) = self.l2cap_psm {
            specs.push(CharacteristicSpec {
                name: "l2cap_psm",
                uuid: psm,
                properties: CharacteristicProperties::read_only(),
            });
        }
        specs
    }

    /// Encodes a PSM as the little-endian 2-byte value the characteristic returns.
    pub fn encode_psm(psm: u16) -> [u8; 2] {
        psm.to_le_bytes()
    }

    /// Decodes a PSM characteristic read.
    pub fn decode_psm(bytes: &[u8]) -> Option<u16> {
        let array: [u8; 2] = bytes.try_into().ok()?;
        Some(u16::from_le_bytes(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_uuid() -> Uuid {
        Uuid::parse_str("0000FFF0-0000-1000-8000-00805F9B34FB").unwrap()
    }

    #[test]
    fn derives_four_distinct_characteristic_uuids_plus_psm() {
        let profile = GattProfile::derive_from_service_uuid(service_uuid());
        let uuids = [
            profile.state,
            profile.client_to_server,
            profile.server_to_client,
            profile.ident,
            profile.l2cap_psm.unwrap(),
        ];
        for i in 0..uuids.len() {
            for j in (i + 1)..uuids.len() {
                assert_ne!(uuids[i], uuids[j]);
            }
        }
    }

    #[test]
    fn characteristic_properties_match_the_profile_table() {
        let profile = GattProfile::derive_from_service_uuid(service_uuid());
        let specs = profile.characteristics();
        let by_name = |name: &str| specs.iter().find(|s| s.name == name).unwrap();

        assert!(by_name("state").properties.notify);
        assert!(by_name("client2server").properties.write);
        assert!(by_name("client2server").properties.write_without_response);
        assert!(by_name("server2client").properties.notify);
        assert!(by_name("ident").properties.read);
        assert!(by_name("l2cap_psm").properties.read);
    }

    #[test]
    fn psm_round_trips_little_endian() {
        let bytes = GattProfile::encode_psm(0x00F1);
        assert_eq!(bytes, [0xF1, 0x00]);
        assert_eq!(GattProfile::decode_psm(&bytes), Some(0x00F1));
    }

    #[test]
    fn omitting_psm_drops_the_characteristic() {
        let mut profile = GattProfile::derive_from_service_uuid(service_uuid());
        profile.l2cap_psm = None;
        assert_eq!(profile.characteristics().len(), 4);
    }
}
