//! Instruction bytes, data-object tags and defaults of the OpenPGP card
//! application (v2.x / v3.x)

/// AID of the OpenPGP card application (RID + PIX prefix)
pub const AID_OPENPGP: [u8; 6] = [0xD2, 0x76, 0x00, 0x01, 0x24, 0x01];

/// Factory default PW1
pub const DEFAULT_PW1: &[u8] = b"123456";
/// Factory default PW3
pub const DEFAULT_PW3: &[u8] = b"12345678";

/// Instruction bytes
pub mod ins {
    /// SELECT
    pub const SELECT: u8 = 0xA4;
    /// GET DATA
    pub const GET_DATA: u8 = 0xCA;
    /// VERIFY
    pub const VERIFY: u8 = 0x20;
    /// CHANGE REFERENCE DATA
    pub const CHANGE_REFERENCE_DATA: u8 = 0x24;
    /// RESET RETRY COUNTER
    pub const RESET_RETRY_COUNTER: u8 = 0x2C;
    /// PUT DATA (even)
    pub const PUT_DATA: u8 = 0xDA;
    /// PUT DATA (odd), used for the extended header list
    pub const PUT_DATA_ODD: u8 = 0xDB;
    /// GENERATE ASYMMETRIC KEY PAIR
    pub const GENERATE_ASYMMETRIC_KEY_PAIR: u8 = 0x47;
    /// GET RESPONSE
    pub const GET_RESPONSE: u8 = 0xC0;
    /// TERMINATE DF
    pub const TERMINATE_DF: u8 = 0xE6;
    /// ACTIVATE FILE
    pub const ACTIVATE_FILE: u8 = 0x44;
}

/// VERIFY / CHANGE REFERENCE DATA password references
pub mod pw {
    /// PW1 valid for one PSO:CDS
    pub const PW1_SIGN: u8 = 0x81;
    /// PW1 valid for other commands
    pub const PW1: u8 = 0x82;
    /// PW3, the admin PIN
    pub const PW3: u8 = 0x83;
}

/// Data-object tags
pub mod tags {
    /// Application Related Data (constructed)
    pub const APPLICATION_RELATED_DATA: u16 = 0x006E;
    /// Full AID
    pub const AID: u16 = 0x004F;
    /// Historical bytes
    pub const HISTORICAL_BYTES: u16 = 0x5F52;
    /// Discretionary data objects (constructed)
    pub const DISCRETIONARY: u16 = 0x0073;
    /// Extended capabilities
    pub const EXTENDED_CAPABILITIES: u16 = 0x00C0;
    /// Algorithm attributes, signature key
    pub const ALGO_ATTR_SIGN: u16 = 0x00C1;
    /// Algorithm attributes, decryption key
    pub const ALGO_ATTR_ENCRYPT: u16 = 0x00C2;
    /// Algorithm attributes, authentication key
    pub const ALGO_ATTR_AUTH: u16 = 0x00C3;
    /// PW status bytes
    pub const PW_STATUS: u16 = 0x00C4;
    /// Key fingerprints, 3 x 20 bytes
    pub const FINGERPRINTS: u16 = 0x00C5;
    /// CA fingerprints
    pub const CA_FINGERPRINTS: u16 = 0x00C6;
    /// Signature key fingerprint (PUT DATA)
    pub const FP_SIGN: u16 = 0x00C7;
    /// Decryption key fingerprint (PUT DATA)
    pub const FP_ENCRYPT: u16 = 0x00C8;
    /// Authentication key fingerprint (PUT DATA)
    pub const FP_AUTH: u16 = 0x00C9;
    /// Generation timestamps, 3 x 4 bytes
    pub const GENERATION_TIMES: u16 = 0x00CD;
    /// Signature key generation timestamp (PUT DATA)
    pub const GEN_TIME_SIGN: u16 = 0x00CE;
    /// Decryption key generation timestamp (PUT DATA)
    pub const GEN_TIME_ENCRYPT: u16 = 0x00CF;
    /// Authentication key generation timestamp (PUT DATA)
    pub const GEN_TIME_AUTH: u16 = 0x00D0;
    /// Extended length information
    pub const EXTENDED_LENGTH_INFO: u16 = 0x7F66;
    /// Public key template
    pub const PUBLIC_KEY: u16 = 0x7F49;
    /// Extended header list for key import
    pub const EXTENDED_HEADER_LIST: u16 = 0x004D;
    /// Private key template inside the extended header list
    pub const PRIVATE_KEY_TEMPLATE: u16 = 0x7F48;
    /// Concatenated key material inside the extended header list
    pub const PRIVATE_KEY_DATA: u16 = 0x5F48;
    /// Cardholder certificate
    pub const CARDHOLDER_CERTIFICATE: u16 = 0x7F21;
    /// RSA modulus inside the public key template
    pub const RSA_MODULUS: u16 = 0x0081;
    /// RSA public exponent inside the public key template
    pub const RSA_EXPONENT: u16 = 0x0082;
    /// EC point inside the public key template
    pub const EC_POINT: u16 = 0x0086;
}
