//! A scripted OpenPGP applet good enough to exercise the connection and
//! operation layers: SELECT, the PIN state machine, data objects, key
//! import, factory reset, and response fragmentation (61xx chaining).
#![allow(dead_code)]

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use keyfob_core::{CardTransport, Command, Error as CoreError, Response, Tlv, TransportKind};

pub const DEFAULT_PW1: &[u8] = b"123456";
pub const DEFAULT_PW3: &[u8] = b"12345678";

/// RSA-2048, e 17 bits, CRT-with-modulus import format
pub const RSA_2048_ATTRS: [u8; 6] = [0x01, 0x08, 0x00, 0x00, 0x11, 0x03];

const AID: [u8; 16] = [
    0xD2, 0x76, 0x00, 0x01, 0x24, 0x01, 0x02, 0x01, 0x00, 0x06, 0x05, 0x00, 0x13, 0x37, 0x00,
    0x00,
];

#[derive(Debug)]
pub struct SimCard {
    pub extended_transport: bool,
    pub extended_card: bool,
    /// When nonzero, responses are cut into chunks of this size and
    /// delivered through 61xx / GET RESPONSE
    pub fragment: usize,
    pub apdu_log: Vec<Bytes>,

    selected: bool,
    released: bool,
    pw1: Vec<u8>,
    pw3: Vec<u8>,
    retries: [u8; 3],
    pw1_verified: bool,
    pw3_verified: bool,
    chain_buf: BytesMut,
    pending: Option<Bytes>,
    data_objects: HashMap<u16, Vec<u8>>,
    fingerprints: [[u8; 20]; 3],
    /// imported public material per CRT tag: (modulus, exponent)
    imported: HashMap<u8, (Vec<u8>, Vec<u8>)>,
}

impl Default for SimCard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCard {
    pub fn new() -> Self {
        Self {
            extended_transport: false,
            extended_card: false,
            fragment: 0,
            apdu_log: Vec::new(),
            selected: false,
            released: false,
            pw1: DEFAULT_PW1.to_vec(),
            pw3: DEFAULT_PW3.to_vec(),
            retries: [3, 0, 3],
            pw1_verified: false,
            pw3_verified: false,
            chain_buf: BytesMut::new(),
            pending: None,
            data_objects: HashMap::new(),
            fingerprints: [[0; 20]; 3],
            imported: HashMap::new(),
        }
    }

    pub fn with_extended() -> Self {
        let mut sim = Self::new();
        sim.extended_transport = true;
        sim.extended_card = true;
        sim
    }

    pub fn set_fingerprint(&mut self, index: usize, fp: [u8; 20]) {
        self.fingerprints[index] = fp;
    }

    fn status(sw: u16) -> Response {
        Response::new(Bytes::new(), sw)
    }

    fn respond(&mut self, payload: Vec<u8>) -> Response {
        if self.fragment == 0 || payload.len() <= self.fragment {
            return Response::success(payload);
        }
        let first = payload[..self.fragment].to_vec();
        let rest = payload[self.fragment..].to_vec();
        let remaining = rest.len().min(255) as u8;
        self.pending = Some(Bytes::from(rest));
        Response::new(first, 0x6100 | remaining as u16)
    }

    fn get_response(&mut self) -> Response {
        let Some(pending) = self.pending.take() else {
            return Self::status(0x6985);
        };
        if self.fragment == 0 || pending.len() <= self.fragment {
            return Response::success(pending);
        }
        let first = pending.slice(..self.fragment).to_vec();
        let rest = pending.slice(self.fragment..);
        let remaining = rest.len().min(255) as u8;
        self.pending = Some(rest);
        Response::new(first, 0x6100 | remaining as u16)
    }

    fn build_ard(&self) -> Vec<u8> {
        let mut c0 = vec![0u8; 10];
        c0[0] = if self.extended_card { 0x01 } else { 0x00 };
        c0[4] = 0x08; // max cardholder certificate: 0x0800
        c0[6] = 0x08; // max command APDU: 0x0800
        c0[8] = 0x08; // max response APDU: 0x0800

        let mut fingerprints = Vec::with_capacity(60);
        for fp in &self.fingerprints {
            fingerprints.extend_from_slice(fp);
        }

        let pw_status = [
            0x00, 0x20, 0x20, 0x20, self.retries[0], self.retries[1], self.retries[2],
        ];

        let mut discretionary = BytesMut::new();
        discretionary.put_slice(&Tlv::encode(0x00C0, &c0));
        discretionary.put_slice(&Tlv::encode(0x00C1, &RSA_2048_ATTRS));
        discretionary.put_slice(&Tlv::encode(0x00C2, &RSA_2048_ATTRS));
        discretionary.put_slice(&Tlv::encode(0x00C3, &RSA_2048_ATTRS));
        discretionary.put_slice(&Tlv::encode(0x00C4, &pw_status));
        discretionary.put_slice(&Tlv::encode(0x00C5, &fingerprints));

        let mut ard = BytesMut::new();
        ard.put_slice(&Tlv::encode(0x004F, &AID));
        ard.put_slice(&Tlv::encode(
            0x5F52,
            &[0x00, 0x73, 0xC0, 0x01, 0xC0, 0x05, 0x90, 0x00],
        ));
        ard.put_slice(&Tlv::encode(0x0073, &discretionary));
        Tlv::encode(0x006E, &ard).to_vec()
    }

    fn verify(&mut self, reference: u8, pin: &[u8]) -> Response {
        let (expected, retry_idx) = match reference {
            0x81 | 0x82 => (self.pw1.clone(), 0usize),
            0x83 => (self.pw3.clone(), 2usize),
            _ => return Self::status(0x6A86),
        };
        if self.retries[retry_idx] == 0 {
            return Self::status(0x6983);
        }
        if pin == expected.as_slice() {
            self.retries[retry_idx] = 3;
            match reference {
                0x81 | 0x82 => self.pw1_verified = true,
                _ => self.pw3_verified = true,
            }
            Self::status(0x9000)
        } else {
            self.retries[retry_idx] -= 1;
            if self.retries[retry_idx] == 0 {
                Self::status(0x6983)
            } else {
                Self::status(0x63C0 | self.retries[retry_idx] as u16)
            }
        }
    }

    fn put_data(&mut self, tag: u16, data: &[u8]) -> Response {
        if !self.pw3_verified {
            return Self::status(0x6982);
        }
        self.data_objects.insert(tag, data.to_vec());
        let slot = match tag {
            0x00C7 => Some(0),
            0x00C8 => Some(1),
            0x00C9 => Some(2),
            _ => None,
        };
        if let Some(slot) = slot {
            if data.len() == 20 {
                self.fingerprints[slot].copy_from_slice(data);
            }
        }
        Self::status(0x9000)
    }

    fn import_key(&mut self, data: &[u8]) -> Response {
        if !self.pw3_verified {
            return Self::status(0x6982);
        }
        let Ok(header_list) = Tlv::parse_single(&Bytes::copy_from_slice(data), true) else {
            return Self::status(0x6A80);
        };
        if header_list.tag != 0x4D || header_list.value.is_empty() {
            return Self::status(0x6A80);
        }
        let crt = header_list.value[0];
        let inner = header_list.value.slice(2..);
        let Ok(parts) = Tlv::parse_all(&inner) else {
            return Self::status(0x6A80);
        };
        let template = Tlv::find_in(&parts, 0x7F48);
        let cryptogram = Tlv::find_in(&parts, 0x5F48);
        let (Some(template), Some(cryptogram)) = (template, cryptogram) else {
            return Self::status(0x6A80);
        };

        // walk the template headers to slice e and n out of the cryptogram
        let mut offset = 0usize;
        let mut cursor = 0usize;
        let mut exponent = Vec::new();
        let mut modulus = Vec::new();
        let raw = template.value.as_ref();
        while cursor + 1 < raw.len() {
            let tag = raw[cursor];
            cursor += 1;
            let (len, advance) = match raw[cursor] {
                0x81 => (raw[cursor + 1] as usize, 2),
                0x82 => (
                    ((raw[cursor + 1] as usize) << 8) | raw[cursor + 2] as usize,
                    3,
                ),
                short => (short as usize, 1),
            };
            cursor += advance;
            if offset + len > cryptogram.value.len() {
                return Self::status(0x6A80);
            }
            let value = &cryptogram.value[offset..offset + len];
            match tag {
                0x91 => exponent = value.to_vec(),
                0x97 => modulus = value.to_vec(),
                _ => {}
            }
            offset += len;
        }
        if exponent.is_empty() || modulus.is_empty() {
            return Self::status(0x6A80);
        }
        self.imported.insert(crt, (modulus, exponent));
        Self::status(0x9000)
    }

    fn read_public_key(&mut self, data: &[u8]) -> Response {
        let Some(&crt) = data.first() else {
            return Self::status(0x6A80);
        };
        let Some((modulus, exponent)) = self.imported.get(&crt).cloned() else {
            return Self::status(0x6A88);
        };
        let mut inner = BytesMut::new();
        inner.put_slice(&Tlv::encode(0x0081, &modulus));
        inner.put_slice(&Tlv::encode(0x0082, &exponent));
        let payload = Tlv::encode(0x7F49, &inner).to_vec();
        self.respond(payload)
    }

    fn execute(&mut self, command: &Command, data: &[u8]) -> Response {
        match command.ins {
            0xA4 => {
                if data.len() >= 6 && &data[..6] == [0xD2, 0x76, 0x00, 0x01, 0x24, 0x01] {
                    self.selected = true;
                    Self::status(0x9000)
                } else {
                    Self::status(0x6A82)
                }
            }
            _ if !self.selected => Self::status(0x6985),
            0xC0 => self.get_response(),
            0x20 => self.verify(command.p2, data),
            0xCA => {
                let tag = ((command.p1 as u16) << 8) | command.p2 as u16;
                match tag {
                    0x006E => {
                        let ard = self.build_ard();
                        self.respond(ard)
                    }
                    other => match self.data_objects.get(&other).cloned() {
                        Some(value) => self.respond(value),
                        None => Self::status(0x6A88),
                    },
                }
            }
            0xDA => {
                let tag = ((command.p1 as u16) << 8) | command.p2 as u16;
                self.put_data(tag, data)
            }
            0xDB => self.import_key(data),
            0x24 => {
                let (current, retry_idx) = match command.p2 {
                    0x81 => (self.pw1.clone(), 0usize),
                    0x83 => (self.pw3.clone(), 2usize),
                    _ => return Self::status(0x6A86),
                };
                if self.retries[retry_idx] == 0 {
                    return Self::status(0x6983);
                }
                if data.len() <= current.len() || !data.starts_with(&current) {
                    self.retries[retry_idx] -= 1;
                    return Self::status(0x63C0 | self.retries[retry_idx] as u16);
                }
                let new = data[current.len()..].to_vec();
                match command.p2 {
                    0x81 => {
                        self.pw1 = new;
                        self.pw1_verified = false;
                    }
                    _ => {
                        self.pw3 = new;
                        self.pw3_verified = false;
                    }
                }
                self.retries[retry_idx] = 3;
                Self::status(0x9000)
            }
            0x2C => {
                if !self.pw3_verified {
                    return Self::status(0x6982);
                }
                self.pw1 = data.to_vec();
                self.retries[0] = 3;
                Self::status(0x9000)
            }
            0x47 if command.p1 == 0x81 => self.read_public_key(data),
            0xE6 => {
                if self.pw3_verified || self.retries[2] == 0 {
                    Self::status(0x9000)
                } else {
                    Self::status(0x6985)
                }
            }
            0x44 => {
                *self = Self {
                    extended_transport: self.extended_transport,
                    extended_card: self.extended_card,
                    fragment: self.fragment,
                    apdu_log: std::mem::take(&mut self.apdu_log),
                    selected: true,
                    ..Self::new()
                };
                Self::status(0x9000)
            }
            _ => Self::status(0x6D00),
        }
    }
}

impl CardTransport for SimCard {
    fn do_transceive(&mut self, command: &Command) -> Result<Response, CoreError> {
        self.apdu_log.push(command.to_bytes());

        if command.is_chained() {
            self.chain_buf.put_slice(&command.data);
            return Ok(Response::success(Bytes::new()));
        }

        let data = if self.chain_buf.is_empty() {
            command.data.to_vec()
        } else {
            let mut full = std::mem::take(&mut self.chain_buf);
            full.put_slice(&command.data);
            full.to_vec()
        };
        Ok(self.execute(command, &data))
    }

    fn is_extended_length_supported(&self) -> bool {
        self.extended_transport
    }

    fn kind(&self) -> TransportKind {
        TransportKind::UsbCcid
    }

    fn ping(&mut self) -> bool {
        !self.released
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn is_released(&self) -> bool {
        self.released
    }
}
