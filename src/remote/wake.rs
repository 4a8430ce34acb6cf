//! Wake-on-LAN magic packets.

use tokio::net::UdpSocket;
use tracing::debug;

use crate::config::WakeConfig;
use crate::error::{ActionError, ActionErrorKind};

/// Strip `:` and `-` delimiters and require exactly 12 hex digits.
/// Returns the upper-case form.
pub fn normalize_mac(mac: &str) -> Result<String, ActionError> {
    let normalized: String = mac.trim().replace([':', '-'], "");
    if normalized.len() != 12 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ActionError::new(
            ActionErrorKind::InvalidAddress,
            format!("'{}' is not a MAC address", mac),
        ));
    }
    Ok(normalized.to_ascii_uppercase())
}

/// Six 0xFF bytes followed by sixteen copies of the hardware address.
pub fn magic_packet(mac: &str) -> Result<Vec<u8>, ActionError> {
    let normalized = normalize_mac(mac)?;
    let bytes = (0..6)
        .map(|i| u8::from_str_radix(&normalized[i * 2..i * 2 + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|e| ActionError::new(ActionErrorKind::InvalidAddress, e.to_string()))?;

    let mut packet = vec![0xFF; 6];
    for _ in 0..16 {
        packet.extend_from_slice(&bytes);
    }
    Ok(packet)
}

/// Send one magic packet to the configured broadcast address. Nothing is
/// received back.
pub async fn send_magic_packet(mac: &str, config: &WakeConfig) -> Result<(), ActionError> {
    let normalized = normalize_mac(mac)?;
    let packet = magic_packet(&normalized)?;

    let network = |e: std::io::Error| ActionError::new(ActionErrorKind::NetworkError, e.to_string());

    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(network)?;
    socket.set_broadcast(true).map_err(network)?;
    socket
        .send_to(&packet, (config.broadcast_addr.as_str(), config.port))
        .await
        .map_err(network)?;

    debug!(
        mac = %normalized,
        target = %format!("{}:{}", config.broadcast_addr, config.port),
        "wake packet sent"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_and_hyphen_forms_normalize_alike() {
        let colon = normalize_mac("AA:BB:CC:DD:EE:FF").unwrap();
        let hyphen = normalize_mac("aa-bb-cc-dd-ee-ff").unwrap();
        assert_eq!(colon, "AABBCCDDEEFF");
        assert_eq!(colon, hyphen);
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for mac in ["not-a-mac", "", "AA:BB:CC:DD:EE", "AA:BB:CC:DD:EE:FF:00", "GG:BB:CC:DD:EE:FF"] {
            let err = normalize_mac(mac).unwrap_err();
            assert_eq!(err.kind, ActionErrorKind::InvalidAddress, "{mac}");
        }
    }

    #[test]
    fn packet_layout() {
        let packet = magic_packet("0011223344AB").unwrap();
        assert_eq!(packet.len(), 102);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for rep in packet[6..].chunks(6) {
            assert_eq!(rep, &[0x00, 0x11, 0x22, 0x33, 0x44, 0xAB]);
        }
    }

    #[tokio::test]
    async fn sends_one_datagram_to_configured_target() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = WakeConfig {
            broadcast_addr: "127.0.0.1".to_string(),
            port: receiver.local_addr().unwrap().port(),
        };

        send_magic_packet("AA-BB-CC-DD-EE-FF", &config).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], magic_packet("AABBCCDDEEFF").unwrap().as_slice());
    }

    #[tokio::test]
    async fn invalid_mac_sends_nothing() {
        let err = send_magic_packet("not-a-mac", &WakeConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ActionErrorKind::InvalidAddress);
    }

    #[tokio::test]
    async fn unresolvable_broadcast_target_is_a_network_error() {
        let config = WakeConfig {
            broadcast_addr: "no-such-host.invalid".to_string(),
            port: 9,
        };
        let err = send_magic_packet("AA:BB:CC:DD:EE:FF", &config)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ActionErrorKind::NetworkError);
    }
}
