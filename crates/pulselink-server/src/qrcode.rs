//! Binding QR code: the URI the controller app scans to learn where to
//! connect and which third party to pair with.

use image::codecs::jpeg::JpegEncoder;
use image::Luma;
use qrcode::QrCode;

use pulselink_core::{RelayError, SecureId};
use pulselink_settings::RelaySettings;

const APP_DOWNLOAD_LINK: &str = "https://www.dungeon-lab.com/app-download.php";
const SOCKET_TAG: &str = "DGLAB-SOCKET";

/// Minimum rendered edge, in pixels. Phone cameras struggle below this.
const MIN_EDGE: u32 = 360;

/// Build the URI encoded into the binding QR code.
pub fn binding_uri(settings: &RelaySettings, secure_id: &SecureId) -> String {
    let protocol = if settings.use_secure_websocket { "wss" } else { "ws" };
    format!(
        "{APP_DOWNLOAD_LINK}#{SOCKET_TAG}#{protocol}://{}:{}/app/{}",
        settings.host_name, settings.port, secure_id
    )
}

/// Render the binding URI as a JPEG image.
pub fn binding_qr_jpeg(
    settings: &RelaySettings,
    secure_id: &SecureId,
) -> Result<Vec<u8>, RelayError> {
    let code = QrCode::new(binding_uri(settings, secure_id).as_bytes())
        .map_err(|e| RelayError::SerializationFailed(format!("qr encoding: {e}")))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_EDGE, MIN_EDGE)
        .build();
    let mut jpeg = Vec::new();
    JpegEncoder::new(&mut jpeg)
        .encode_image(&image)
        .map_err(|e| RelayError::SerializationFailed(format!("jpeg encoding: {e}")))?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RelaySettings {
        RelaySettings {
            host_name: "relay.example.net".to_owned(),
            port: 8920,
            ..RelaySettings::default()
        }
    }

    #[test]
    fn uri_carries_tag_host_port_and_client_id() {
        let uri = binding_uri(&settings(), &SecureId::from_raw("abc-123"));
        assert_eq!(
            uri,
            "https://www.dungeon-lab.com/app-download.php#DGLAB-SOCKET#ws://relay.example.net:8920/app/abc-123"
        );
    }

    #[test]
    fn uri_uses_wss_when_configured() {
        let mut settings = settings();
        settings.use_secure_websocket = true;
        let uri = binding_uri(&settings, &SecureId::from_raw("abc"));
        assert!(uri.contains("#wss://relay.example.net:8920/app/abc"));
    }

    #[test]
    fn qr_renders_as_jpeg() {
        let bytes = binding_qr_jpeg(&settings(), &SecureId::mint()).unwrap();
        // JPEG SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(bytes.len() > 500);
    }
}
