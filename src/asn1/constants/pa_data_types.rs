use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum PaDataType {
    PaTgsReq = 1,
    PaEncTimestamp = 2,
    PaPwSalt = 3,
    PaEncUnixTime = 5, // (deprecated)
    PaEtypeInfo = 11,
    PaPkAsReqOld = 14, // (pkinit)
    PaPkAsRepOld = 15, // (pkinit)
    PaPkAsReq = 16,    // (pkinit)
    PaPkAsRep = 17,    // (pkinit)
    PaEtypeInfo2 = 19, // (replaces pa-etype-info)
    PaUseSpecifiedKvno = 20,
    PaPacRequest = 128,         // Include Windows PAC
    PaFxCookie = 133,           // RFC6113 FAST Cookie
    PaFxFast = 136,             // RFC6113 FAST
    PaFxError = 137,            // RFC6113 FAST
    PaEncryptedChallenge = 138, // RFC6113 FAST
    PaTokenRequest = 148,       // Bearer token (JWT) preauthentication
    EncpadataReqEncPaRep = 149, // RFC 6806
    PadataAsFreshness = 150,    // RFC 8070
}
