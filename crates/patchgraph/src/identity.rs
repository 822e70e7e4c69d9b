//! Hardware listing parsing and stable device identity.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::DeviceRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnumerationError {
    /// The listing tool could not be run or exited unsuccessfully.
    #[error("listing tool failed: {0}")]
    ToolFailed(String),

    /// The tool ran but nothing matched `card N: NAME, device M: NAME`.
    /// Either there is no sound hardware or the output format changed.
    #[error("no sound devices found in listing")]
    NoDevices,
}

fn card_device_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"card (\d+): (.+), device (\d+): (.+)").expect("listing pattern is valid")
    })
}

/// Parse `aplay -l` style output into device records.
///
/// Devices whose names hash to an id already seen in the same listing are
/// dropped with a warning; the first occurrence wins.
pub fn parse_card_listing(listing: &str) -> Result<Vec<DeviceRecord>, EnumerationError> {
    let mut devices = Vec::new();
    let mut seen = HashSet::new();

    for caps in card_device_re().captures_iter(listing) {
        let (Ok(card_index), Ok(device_index)) = (caps[1].parse::<u32>(), caps[3].parse::<u32>()) else {
            continue;
        };
        let card_name = caps[2].trim();
        let device_name = caps[4].trim();

        let record = DeviceRecord::new(card_index, card_name, device_index, device_name);
        if !seen.insert(record.id.clone()) {
            tracing::warn!(
                device = %record.id,
                card_name,
                device_name,
                "duplicate device names in listing, keeping first"
            );
            continue;
        }
        devices.push(record);
    }

    if devices.is_empty() {
        return Err(EnumerationError::NoDevices);
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "**** List of PLAYBACK Hardware Devices ****
card 0: PCH [HDA Intel PCH], device 0: ALC892 Analog [ALC892 Analog]
  Subdevices: 1/1
  Subdevice #0: subdevice #0
card 0: PCH [HDA Intel PCH], device 1: ALC892 Digital [ALC892 Digital]
  Subdevices: 1/1
  Subdevice #0: subdevice #0
card 1: USB (USB Audio), device 0: USB Audio
  Subdevices: 0/1
  Subdevice #0: subdevice #0
";

    #[test]
    fn test_parse_listing() {
        let devices = parse_card_listing(LISTING).unwrap();
        assert_eq!(devices.len(), 3);

        assert_eq!(devices[0].card_name, "PCH [HDA Intel PCH]");
        assert_eq!(devices[0].device_name, "ALC892 Analog [ALC892 Analog]");
        assert_eq!(devices[1].device_index, 1);

        let usb = &devices[2];
        assert_eq!(usb.card_index, 1);
        assert_eq!(usb.card_name, "USB (USB Audio)");
        assert_eq!(usb.device_name, "USB Audio");
        assert_eq!(usb.id.as_str(), "d2e84e43448844db");
        assert_eq!(usb.hw_address(), "hw:1,0");
    }

    #[test]
    fn test_identity_survives_renumbering() {
        let before = parse_card_listing("card 1: USB (USB Audio), device 0: USB Audio\n").unwrap();
        let after = parse_card_listing("card 4: USB (USB Audio), device 2: USB Audio\n").unwrap();
        assert_eq!(before[0].id, after[0].id);
        assert_eq!(after[0].hw_address(), "hw:4,2");
    }

    #[test]
    fn test_empty_listing_is_an_error() {
        assert_eq!(
            parse_card_listing("aplay: device_list:274: no soundcards found...\n"),
            Err(EnumerationError::NoDevices)
        );
        assert_eq!(parse_card_listing(""), Err(EnumerationError::NoDevices));
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let listing = "card 1: Twin, device 0: Out\ncard 2: Twin, device 0: Out\n";
        let devices = parse_card_listing(listing).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].card_index, 1);
    }
}
