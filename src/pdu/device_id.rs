// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FC 0x2B / MEI 0x0E — Read Device Identification.

use super::PduError;

/// The Modbus Encapsulated Interface type for device identification.
pub const MEI_TYPE_DEVICE_IDENTIFICATION: u8 = 0x0E;

/// Well-known device identification object IDs (Modbus Application Protocol
/// V1.1b3, §6.21).
pub mod object_id {
    pub const VENDOR_NAME: u8 = 0x00;
    pub const PRODUCT_CODE: u8 = 0x01;
    pub const REVISION: u8 = 0x02;
    pub const VENDOR_URL: u8 = 0x03;
    pub const PRODUCT_NAME: u8 = 0x04;
    pub const MODEL_NAME: u8 = 0x05;
    pub const USER_APPLICATION_NAME: u8 = 0x06;
}

/// A decoded Read Device Identification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    /// The read device ID code echoed from the request (basic/regular/
    /// extended/individual).
    pub read_device_id_code: u8,
    /// Conformity level reported by the server.
    pub conformity_level: u8,
    /// Whether further objects remain to be read via a continuation request.
    pub more_follows: bool,
    /// The object ID to request next if `more_follows` is set.
    pub next_object_id: u8,
    /// The `{id, data}` pairs returned in this response.
    pub objects: Vec<(u8, Vec<u8>)>,
}

impl DeviceIdentification {
    /// Looks up an object by its numeric ID.
    #[must_use]
    pub fn object(&self, id: u8) -> Option<&[u8]> {
        self.objects
            .iter()
            .find(|(oid, _)| *oid == id)
            .map(|(_, data)| data.as_slice())
    }

    /// Convenience accessor for the well-known `VendorName` object.
    #[must_use]
    pub fn vendor_name(&self) -> Option<&[u8]> {
        self.object(object_id::VENDOR_NAME)
    }

    /// Convenience accessor for the well-known `ProductCode` object.
    #[must_use]
    pub fn product_code(&self) -> Option<&[u8]> {
        self.object(object_id::PRODUCT_CODE)
    }

    /// Convenience accessor for the well-known `Revision` object.
    #[must_use]
    pub fn revision(&self) -> Option<&[u8]> {
        self.object(object_id::REVISION)
    }

    /// Convenience accessor for the well-known `VendorUrl` object.
    #[must_use]
    pub fn vendor_url(&self) -> Option<&[u8]> {
        self.object(object_id::VENDOR_URL)
    }

    /// Convenience accessor for the well-known `ProductName` object.
    #[must_use]
    pub fn product_name(&self) -> Option<&[u8]> {
        self.object(object_id::PRODUCT_NAME)
    }

    /// Convenience accessor for the well-known `ModelName` object.
    #[must_use]
    pub fn model_name(&self) -> Option<&[u8]> {
        self.object(object_id::MODEL_NAME)
    }

    /// Convenience accessor for the well-known `UserApplicationName` object.
    #[must_use]
    pub fn user_application_name(&self) -> Option<&[u8]> {
        self.object(object_id::USER_APPLICATION_NAME)
    }
}

pub(super) fn build(read_device_id_code: u8, object_id: u8) -> Vec<u8> {
    vec![
        0x2B,
        MEI_TYPE_DEVICE_IDENTIFICATION,
        read_device_id_code,
        object_id,
    ]
}

pub(super) fn parse(pdu: &[u8]) -> Result<DeviceIdentification, PduError> {
    if pdu.len() < 7 {
        return Err(PduError::PduTooShort {
            expected: 7,
            got: pdu.len(),
        });
    }
    let mei = pdu[1];
    if mei != MEI_TYPE_DEVICE_IDENTIFICATION {
        return Err(PduError::InvalidMeiType(mei));
    }
    let read_device_id_code = pdu[2];
    let conformity_level = pdu[3];
    let more_follows = pdu[4] != 0x00;
    let next_object_id = pdu[5];
    let num_objects = pdu[6] as usize;

    let mut objects = Vec::with_capacity(num_objects);
    let mut offset = 7;
    for _ in 0..num_objects {
        if offset + 2 > pdu.len() {
            return Err(PduError::PduTooShort {
                expected: offset + 2,
                got: pdu.len(),
            });
        }
        let id = pdu[offset];
        let len = pdu[offset + 1] as usize;
        let data_start = offset + 2;
        let data_end = data_start + len;
        if data_end > pdu.len() {
            return Err(PduError::PduTooShort {
                expected: data_end,
                got: pdu.len(),
            });
        }
        objects.push((id, pdu[data_start..data_end].to_vec()));
        offset = data_end;
    }

    Ok(DeviceIdentification {
        read_device_id_code,
        conformity_level,
        more_follows,
        next_object_id,
        objects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_pdu() {
        assert_eq!(build(0x01, 0x00), vec![0x2B, 0x0E, 0x01, 0x00]);
    }

    #[test]
    fn parses_single_object_response() {
        let pdu = [
            0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x04, b'A', b'c', b'm', b'e',
        ];
        let info = parse(&pdu).unwrap();
        assert_eq!(info.read_device_id_code, 0x01);
        assert_eq!(info.conformity_level, 0x01);
        assert!(!info.more_follows);
        assert_eq!(info.vendor_name(), Some(&b"Acme"[..]));
    }

    #[test]
    fn rejects_wrong_mei_type() {
        let pdu = [0x2B, 0x0D, 0x01, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(parse(&pdu).unwrap_err(), PduError::InvalidMeiType(0x0D));
    }

    #[test]
    fn rejects_truncated_object_table() {
        let pdu = [0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x04, b'A'];
        assert!(matches!(
            parse(&pdu).unwrap_err(),
            PduError::PduTooShort { .. }
        ));
    }
}
