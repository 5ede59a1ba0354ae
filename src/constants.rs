use std::time::Duration;

/// The largest message we will accept on a stream before the length prefix.
pub(crate) const DEFAULT_IO_MAX_SIZE: usize = 128 * 1024;

/// RFC3962 default iteration count for PBKDF2 when the KDC does not send s2kparams.
pub const RFC_PBKDF2_SHA1_ITER: u32 = 0x1000;

pub(crate) const AES_BLOCK_SIZE: usize = 16;
pub(crate) const AES_128_KEY_LEN: usize = 16;
pub(crate) const AES_256_KEY_LEN: usize = 32;
pub(crate) const DES3_KEY_LEN: usize = 24;
pub(crate) const DES3_KEY_INPUT_LEN: usize = 21;
pub(crate) const DES_BLOCK_SIZE: usize = 8;
pub(crate) const RC4_KEY_LEN: usize = 16;

pub(crate) const SHA1_HMAC_LEN: usize = 20;
pub(crate) const SHA1_HMAC_96_LEN: usize = 12;
pub(crate) const MD5_HMAC_LEN: usize = 16;

pub(crate) const DEFAULT_TICKET_LIFETIME: Duration = Duration::from_secs(8 * 60 * 60);
pub(crate) const DEFAULT_RENEW_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub(crate) const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);
pub(crate) const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) const KRB5_PVNO: u8 = 5;

/// Key usage numbers, RFC4120 section 7.5.1 and RFC6113 section 5.4.
pub mod key_usage {
    pub const AS_REQ_PA_ENC_TIMESTAMP: i32 = 1;
    pub const KDC_REP_TICKET: i32 = 2;
    pub const AS_REP_ENC_PART: i32 = 3;
    pub const TGS_REQ_AUTH_DATA_SESSION_KEY: i32 = 4;
    pub const TGS_REQ_AUTH_DATA_SUB_KEY: i32 = 5;
    pub const TGS_REQ_AUTH_CKSUM: i32 = 6;
    pub const TGS_REQ_AUTH: i32 = 7;
    pub const TGS_REP_ENC_PART_SESSION_KEY: i32 = 8;
    pub const TGS_REP_ENC_PART_SUB_KEY: i32 = 9;
    pub const AP_REQ_AUTH_CKSUM: i32 = 10;
    pub const AP_REQ_AUTH: i32 = 11;
    pub const AP_REP_ENCPART: i32 = 12;
    pub const PA_PKINIT_KX: i32 = 44;
    pub const FAST_REQ_CHKSUM: i32 = 50;
    pub const FAST_ENC: i32 = 51;
    pub const FAST_REP: i32 = 52;
    pub const FAST_FINISHED: i32 = 53;
    pub const ENC_CHALLENGE_CLIENT: i32 = 54;
    pub const ENC_CHALLENGE_KDC: i32 = 55;
}
