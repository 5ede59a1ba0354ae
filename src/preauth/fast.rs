//! FAST armoring, RFC 6113. The client wraps its real request inside an
//! encrypted KrbFastReq keyed by the armor key, and the KDC answers inside a
//! KrbFastResponse under the same key.

use super::{MechanismContext, PaFlags, PreauthMechanism, RequestContext};
use crate::ap::{build_ap_req, validate_ap_req_at, ApReq, ApReqOptions, ApUsage, KeySource};
use crate::asn1::checksum::Checksum as KdcChecksum;
use crate::asn1::constants::{ChecksumType, PaDataType};
use crate::asn1::decode_padded;
use crate::asn1::encryption_key::EncryptionKey as KdcEncryptionKey;
use crate::asn1::fast::{
    KrbFastArmor, KrbFastArmoredRep, KrbFastArmoredReq, KrbFastFinished, KrbFastReq,
    KrbFastResponse, PaFxFastReply, PaFxFastRequest, FX_FAST_ARMOR_AP_REQUEST,
};
use crate::asn1::kerberos_flags::KerberosFlags;
use crate::asn1::principal_name::PrincipalName;
use crate::asn1::realm::Realm;
use crate::constants::key_usage;
use crate::crypto::fast::make_armor_key;
use crate::crypto::{make_checksum, verify_checksum, Checksum, EncryptionKey};
use crate::error::KrbError;
use crate::proto::{kerberos_time, EncTicket, KdcRequest, Name, PaData, RequestBody, Ticket};
use der::asn1::OctetString;
use der::{Decode, Encode};
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, instrument, trace};

// Bits 0 to 15 of the FAST options are critical. We understand none of them.
const CRITICAL_FAST_OPTIONS: u32 = 0xFFFF;

/// The armor of one AS exchange. Built from an armor ticket before any
/// padata is produced, and reused for every request of that exchange.
pub struct FastArmor {
    armor_key: EncryptionKey,
    armor: KrbFastArmor,
}

impl fmt::Debug for FastArmor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastArmor")
            .field("armor_key", &self.armor_key)
            .finish_non_exhaustive()
    }
}

impl FastArmor {
    pub fn new(armor_ticket: &Ticket) -> Result<Self, KrbError> {
        let subkey = EncryptionKey::random(armor_ticket.session_key().etype())?;
        Self::with_subkey(armor_ticket, subkey)
    }

    /// Armor with a caller chosen AP-REQ subkey.
    pub fn with_subkey(armor_ticket: &Ticket, subkey: EncryptionKey) -> Result<Self, KrbError> {
        let armor_key = make_armor_key(&subkey, armor_ticket.session_key())?;
        let built = build_ap_req(
            armor_ticket,
            ApReqOptions {
                subkey: Some(subkey),
                ..Default::default()
            },
        )?;

        Ok(FastArmor {
            armor_key,
            armor: KrbFastArmor {
                armor_type: FX_FAST_ARMOR_AP_REQUEST,
                armor_value: OctetString::new(built.ap_req.to_der()?)?,
            },
        })
    }

    pub fn armor_key(&self) -> &EncryptionKey {
        &self.armor_key
    }

    /// Build the outer request: `body` in the clear, and `body` with the real
    /// padata sealed inside PA-FX-FAST.
    #[instrument(level = "debug", skip_all)]
    pub(crate) fn armor_request(
        &self,
        body: RequestBody,
        inner_padata: &[PaData],
    ) -> Result<KdcRequest, KrbError> {
        let mut outer = KdcRequest::new(body, Vec::new())?;

        let req_checksum = make_checksum(
            ChecksumType::NONE,
            outer.raw_body(),
            Some(&self.armor_key),
            Some(key_usage::FAST_REQ_CHKSUM),
        )?;

        let fast_req = KrbFastReq {
            fast_options: KerberosFlags::none(),
            padata: PaData::to_method_data(inner_padata)?,
            req_body: outer.wire_body()?,
        };
        let enc_fast_req = self
            .armor_key
            .encrypt_data(&fast_req.to_der()?, key_usage::FAST_ENC)?;

        let armored = PaFxFastRequest(KrbFastArmoredReq {
            armor: Some(self.armor.clone()),
            req_checksum: KdcChecksum::try_from(&req_checksum)?,
            enc_fast_req,
        });

        trace!(inner = inner_padata.len(), "armored request");
        outer
            .padata
            .push(PaData::new(PaDataType::PaFxFast, armored.to_der()?));
        Ok(outer)
    }

    /// Open the PA-FX-FAST of a reply or of the method data of an error.
    pub(crate) fn unwrap_reply(&self, padata: &[PaData], nonce: u32) -> Result<FastReply, KrbError> {
        let Some(pa) = PaData::find(padata, PaDataType::PaFxFast) else {
            error!("armored exchange answered without PA-FX-FAST");
            return Err(KrbError::ReplyUnexpected);
        };

        let PaFxFastReply(armored) = PaFxFastReply::from_der(&pa.value).map_err(|err| {
            error!(?err, "unable to decode fast reply");
            KrbError::DerDecodeFastMessage
        })?;

        let plain = self
            .armor_key
            .decrypt_data(&armored.enc_fast_rep, key_usage::FAST_REP)?;
        let response: KrbFastResponse = decode_padded(&plain).map_err(|err| {
            error!(?err, "unable to decode fast response");
            KrbError::DerDecodeFastMessage
        })?;

        if response.nonce != nonce {
            error!(
                expected = nonce,
                got = response.nonce,
                "fast response nonce does not match request"
            );
            return Err(KrbError::ReplyNonceMismatch);
        }

        Ok(FastReply {
            padata: PaData::from_method_data(&response.padata),
            strengthen_key: response
                .strengthen_key
                .as_ref()
                .map(EncryptionKey::try_from)
                .transpose()?,
            finished: response.finished,
        })
    }
}

/// The contents of a KrbFastResponse, as the client sees it.
#[derive(Debug)]
pub(crate) struct FastReply {
    pub(crate) padata: Vec<PaData>,
    pub(crate) strengthen_key: Option<EncryptionKey>,
    finished: Option<KrbFastFinished>,
}

impl FastReply {
    /// A successful armored reply must prove the ticket was not swapped
    /// outside the tunnel.
    pub(crate) fn verify_finished(
        &self,
        armor_key: &EncryptionKey,
        ticket: &EncTicket,
        client: &Name,
    ) -> Result<(), KrbError> {
        let Some(finished) = self.finished.as_ref() else {
            error!("armored reply carries no finished field");
            return Err(KrbError::ReplyUnexpected);
        };

        let checksum = Checksum::try_from(&finished.ticket_checksum)?;
        verify_checksum(
            &checksum,
            &ticket.to_der()?,
            Some(armor_key),
            Some(key_usage::FAST_FINISHED),
        )
        .map_err(|err| {
            error!(?err, "fast finished ticket checksum mismatch");
            KrbError::ApErrModified
        })?;

        let finished_client = Name::try_from((&finished.cname, &finished.crealm))?;
        if &finished_client != client {
            error!(%finished_client, %client, "fast finished names another client");
            return Err(KrbError::ReplyNameMismatch);
        }

        Ok(())
    }
}

/// An armored request after the KDC removed the tunnel.
#[derive(Debug)]
pub(crate) struct FastRequest {
    pub(crate) armor_key: EncryptionKey,
    pub(crate) inner: KdcRequest,
}

/// Unwrap PA-FX-FAST on the KDC side. `None` when the request is not
/// armored. The armor ticket must be a TGT the `keys` can open.
#[instrument(level = "debug", skip_all)]
pub(crate) fn unwrap_request(
    outer: &KdcRequest,
    keys: &dyn KeySource,
    skew: Duration,
    now: SystemTime,
) -> Result<Option<FastRequest>, KrbError> {
    let Some(pa) = PaData::find(outer.padata(), PaDataType::PaFxFast) else {
        return Ok(None);
    };

    let PaFxFastRequest(armored) = PaFxFastRequest::from_der(&pa.value).map_err(|err| {
        error!(?err, "unable to decode fast request");
        KrbError::DerDecodeFastMessage
    })?;

    let Some(armor) = armored.armor.as_ref() else {
        error!("fast request without armor");
        return Err(KrbError::PreauthFailed);
    };
    if armor.armor_type != FX_FAST_ARMOR_AP_REQUEST {
        error!(armor_type = armor.armor_type, "unsupported fast armor type");
        return Err(KrbError::PreauthUnsupported);
    }

    let ap_req = ApReq::from_der(armor.armor_value.as_bytes())?;
    let validated = validate_ap_req_at(&ap_req, keys, None, skew, now, ApUsage::Application)?;

    let armor_ticket = validated.ticket();
    if !armor_ticket
        .service()
        .is_service_krbtgt(armor_ticket.service().realm())
    {
        error!(service = %armor_ticket.service(), "armor ticket is not a tgt");
        return Err(KrbError::TgsTicketIsNotTgt);
    }

    let Some(subkey) = validated.subkey() else {
        error!("armor ap-req carries no subkey");
        return Err(KrbError::PreauthFailed);
    };
    let armor_key = make_armor_key(subkey, armor_ticket.session_key())?;

    let req_checksum = Checksum::try_from(&armored.req_checksum)?;
    verify_checksum(
        &req_checksum,
        outer.raw_body(),
        Some(&armor_key),
        Some(key_usage::FAST_REQ_CHKSUM),
    )
    .map_err(|err| {
        error!(?err, "fast request checksum mismatch");
        KrbError::ApErrModified
    })?;

    let plain = armor_key.decrypt_data(&armored.enc_fast_req, key_usage::FAST_ENC)?;
    let fast_req: KrbFastReq = decode_padded(&plain).map_err(|err| {
        error!(?err, "unable to decode fast inner request");
        KrbError::DerDecodeFastMessage
    })?;

    if fast_req.fast_options.bits() & CRITICAL_FAST_OPTIONS != 0 {
        error!(options = fast_req.fast_options.bits(), "unknown critical fast option");
        return Err(KrbError::KdcPolicyRejected);
    }

    debug!(armor_client = %validated.client(), "fast armor accepted");
    let inner = KdcRequest::from_wire_body(
        &fast_req.req_body,
        PaData::from_method_data(&fast_req.padata),
    )?;

    Ok(Some(FastRequest { armor_key, inner }))
}

/// The finished field of a successful armored reply.
pub(crate) fn make_finished(
    armor_key: &EncryptionKey,
    client: &Name,
    ticket: &EncTicket,
    now: SystemTime,
) -> Result<KrbFastFinished, KrbError> {
    let (timestamp, usec) = kerberos_time(now)?;
    let (cname, crealm) = <(PrincipalName, Realm)>::try_from(client)?;
    let ticket_checksum = make_checksum(
        ChecksumType::NONE,
        &ticket.to_der()?,
        Some(armor_key),
        Some(key_usage::FAST_FINISHED),
    )?;

    Ok(KrbFastFinished {
        timestamp,
        usec,
        crealm,
        cname,
        ticket_checksum: KdcChecksum::try_from(&ticket_checksum)?,
    })
}

/// Seal `padata` and the optional strengthen key and finished field into a
/// PA-FX-FAST reply.
pub(crate) fn armor_reply(
    armor_key: &EncryptionKey,
    padata: &[PaData],
    strengthen_key: Option<&EncryptionKey>,
    finished: Option<KrbFastFinished>,
    nonce: u32,
) -> Result<PaData, KrbError> {
    let response = KrbFastResponse {
        padata: PaData::to_method_data(padata)?,
        strengthen_key: strengthen_key.map(KdcEncryptionKey::try_from).transpose()?,
        finished,
        nonce,
    };

    let enc_fast_rep = armor_key.encrypt_data(&response.to_der()?, key_usage::FAST_REP)?;
    let reply = PaFxFastReply(KrbFastArmoredRep { enc_fast_rep });
    Ok(PaData::new(PaDataType::PaFxFast, reply.to_der()?))
}

/// Echoes the KDC cookie. The armor itself is applied by the client when
/// the request is sent, not by this mechanism.
#[derive(Debug, Default)]
pub struct FastMechanism;

impl FastMechanism {
    fn echo_cookie(ctx: &mut RequestContext, padata: &[PaData], out: &mut Vec<PaData>) {
        if let Some(cookie) = PaData::find(padata, PaDataType::PaFxCookie) {
            ctx.cookie = Some(cookie.value.clone());
        }
        if let Some(cookie) = ctx.cookie.as_ref() {
            out.push(PaData::new(PaDataType::PaFxCookie, cookie.clone()));
        }
    }
}

impl PreauthMechanism for FastMechanism {
    fn pa_type(&self) -> PaDataType {
        PaDataType::PaFxFast
    }

    fn flags(&self, _pa_type: PaDataType) -> PaFlags {
        PaFlags::Info
    }

    fn init_request_context(&self, _ctx: &RequestContext) -> Result<MechanismContext, KrbError> {
        Ok(Box::new(()))
    }

    fn try_first(
        &self,
        _ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        _out: &mut Vec<PaData>,
    ) -> Result<(), KrbError> {
        Ok(())
    }

    fn process(
        &self,
        ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        in_padata: &[PaData],
        out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError> {
        Self::echo_cookie(ctx, in_padata, out);
        Ok(false)
    }

    fn try_again(
        &self,
        ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        _failed_type: PaDataType,
        error_padata: &[PaData],
        out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError> {
        Self::echo_cookie(ctx, error_padata, out);
        Ok(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{armor_reply, make_finished, unwrap_request, FastArmor, FastMechanism};
    use crate::asn1::constants::{EncryptionType, PaDataType};
    use crate::asn1::kerberos_flags::KerberosFlags;
    use crate::asn1::ticket_flags::TicketFlags;
    use crate::crypto::{EncryptionKey, EncryptionPolicy};
    use crate::error::KrbError;
    use crate::preauth::{CredentialSource, PreauthMechanism, RequestContext};
    use crate::proto::{Name, PaData, RequestBody, Ticket, TicketPart};
    use assert_hex::assert_eq_hex;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub(crate) const SKEW: Duration = Duration::from_secs(300);

    pub(crate) fn krbtgt_key() -> EncryptionKey {
        EncryptionKey::new(
            EncryptionType::AES256_CTS_HMAC_SHA1_96,
            vec![0x4b; 32],
            Some(1),
        )
        .unwrap()
    }

    /// A TGT for host/client.example.com, sealed under `krbtgt_key`.
    pub(crate) fn armor_ticket(now: SystemTime) -> Ticket {
        let part = TicketPart {
            flags: TicketFlags::Initial | TicketFlags::PreAuthent,
            key: EncryptionKey::new(
                EncryptionType::AES256_CTS_HMAC_SHA1_96,
                vec![0x5a; 32],
                None,
            )
            .unwrap(),
            client: Name::service("host", "client.example.com", "EXAMPLE.COM"),
            auth_time: now,
            start_time: now,
            end_time: now + Duration::from_secs(3600),
            renew_until: None,
        };
        let enc_ticket = part
            .seal(Name::service_krbtgt("EXAMPLE.COM"), &krbtgt_key())
            .unwrap();
        part.into_ticket(enc_ticket)
    }

    pub(crate) fn fixed_subkey() -> EncryptionKey {
        EncryptionKey::new(
            EncryptionType::AES256_CTS_HMAC_SHA1_96,
            vec![0x3c; 32],
            None,
        )
        .unwrap()
    }

    pub(crate) fn test_armor() -> FastArmor {
        FastArmor::with_subkey(&armor_ticket(SystemTime::now()), fixed_subkey()).unwrap()
    }

    fn body(nonce: u32) -> RequestBody {
        RequestBody {
            kdc_options: KerberosFlags::Canonicalize,
            client: Some(Name::principal("alice", "EXAMPLE.COM")),
            service: Name::service_krbtgt("EXAMPLE.COM"),
            from: None,
            until: UNIX_EPOCH + Duration::from_secs(1_800_000_000),
            renew_until: None,
            nonce,
            etypes: vec![EncryptionType::AES256_CTS_HMAC_SHA1_96.into()],
        }
    }

    #[test]
    fn armor_key_is_cf2_of_subkey_and_session_key() {
        let ticket = armor_ticket(SystemTime::now());
        let armor = FastArmor::with_subkey(&ticket, fixed_subkey()).unwrap();
        assert_eq!(
            armor.armor_key().etype(),
            EncryptionType::AES256_CTS_HMAC_SHA1_96
        );
        assert_eq_hex!(
            armor.armor_key().as_bytes(),
            hex::decode("14a5043b6ee56364bd36bcb277283ba46640785f1b0bc0c7e61a29904fd2a78b")
                .unwrap()
                .as_slice()
        );
    }

    #[test]
    fn armored_request_round_trip() {
        let now = SystemTime::now();
        let armor = FastArmor::with_subkey(&armor_ticket(now), fixed_subkey()).unwrap();
        let inner_padata = vec![PaData::new(PaDataType::PaEncTimestamp, vec![1, 2, 3])];

        let outer = armor.armor_request(body(7), &inner_padata).unwrap();
        assert_eq!(outer.padata().len(), 1);
        assert_eq!(outer.padata()[0].pa_type(), Some(PaDataType::PaFxFast));

        let unwrapped = unwrap_request(&outer, &krbtgt_key(), SKEW, now)
            .unwrap()
            .unwrap();
        assert_eq!(&unwrapped.armor_key, armor.armor_key());
        assert_eq!(unwrapped.inner.padata(), inner_padata.as_slice());
        assert_eq!(unwrapped.inner.body(), &body(7));
        assert_eq_hex!(unwrapped.inner.raw_body(), outer.raw_body());

        // Plain requests pass through.
        let plain = crate::proto::KdcRequest::new(body(7), vec![]).unwrap();
        assert!(unwrap_request(&plain, &krbtgt_key(), SKEW, now)
            .unwrap()
            .is_none());
    }

    #[test]
    fn tampered_outer_body_is_detected() {
        let now = SystemTime::now();
        let armor = FastArmor::with_subkey(&armor_ticket(now), fixed_subkey()).unwrap();
        let outer = armor.armor_request(body(7), &[]).unwrap();

        let mut forged = crate::proto::KdcRequest::new(body(8), vec![]).unwrap();
        forged.padata = outer.padata().to_vec();
        assert!(matches!(
            unwrap_request(&forged, &krbtgt_key(), SKEW, now),
            Err(KrbError::ApErrModified)
        ));
    }

    #[test]
    fn armor_ticket_must_be_a_tgt() {
        let now = SystemTime::now();
        let service_key = krbtgt_key();
        let part = TicketPart {
            flags: TicketFlags::Initial,
            key: fixed_subkey(),
            client: Name::principal("alice", "EXAMPLE.COM"),
            auth_time: now,
            start_time: now,
            end_time: now + Duration::from_secs(3600),
            renew_until: None,
        };
        let enc_ticket = part
            .seal(
                Name::service("host", "pepper.example.com", "EXAMPLE.COM"),
                &service_key,
            )
            .unwrap();
        let ticket = part.into_ticket(enc_ticket);

        let armor = FastArmor::with_subkey(&ticket, fixed_subkey()).unwrap();
        let outer = armor.armor_request(body(1), &[]).unwrap();
        assert!(matches!(
            unwrap_request(&outer, &service_key, SKEW, now),
            Err(KrbError::TgsTicketIsNotTgt)
        ));
    }

    #[test]
    fn reply_unwrap_checks_nonce_and_finished() {
        let now = SystemTime::now();
        let ticket = armor_ticket(now);
        let armor = test_armor();
        let strengthen = EncryptionKey::random(EncryptionType::AES256_CTS_HMAC_SHA1_96).unwrap();
        let alice = Name::principal("alice", "EXAMPLE.COM");

        let finished = make_finished(armor.armor_key(), &alice, ticket.enc_ticket(), now).unwrap();
        let pa = armor_reply(
            armor.armor_key(),
            &[PaData::new(PaDataType::PaFxCookie, vec![9])],
            Some(&strengthen),
            Some(finished),
            42,
        )
        .unwrap();

        assert!(matches!(
            armor.unwrap_reply(std::slice::from_ref(&pa), 43),
            Err(KrbError::ReplyNonceMismatch)
        ));

        let reply = armor.unwrap_reply(&[pa], 42).unwrap();
        assert_eq!(reply.strengthen_key.as_ref(), Some(&strengthen));
        assert_eq!(reply.padata, vec![PaData::new(PaDataType::PaFxCookie, vec![9])]);
        reply
            .verify_finished(armor.armor_key(), ticket.enc_ticket(), &alice)
            .unwrap();

        let bob = Name::principal("bob", "EXAMPLE.COM");
        assert!(matches!(
            reply.verify_finished(armor.armor_key(), ticket.enc_ticket(), &bob),
            Err(KrbError::ReplyNameMismatch)
        ));

        let other = armor_ticket(now + Duration::from_secs(1));
        assert!(matches!(
            reply.verify_finished(armor.armor_key(), other.enc_ticket(), &alice),
            Err(KrbError::ApErrModified)
        ));

        // Missing entirely.
        assert!(matches!(
            armor.unwrap_reply(&[], 42),
            Err(KrbError::ReplyUnexpected)
        ));
    }

    #[test]
    fn cookie_is_echoed() {
        let mech = FastMechanism;
        let mut ctx = RequestContext::new(
            Name::principal("alice", "EXAMPLE.COM"),
            Name::service_krbtgt("EXAMPLE.COM"),
            CredentialSource::Pkinit,
            EncryptionPolicy::default(),
            1,
            SystemTime::now(),
            SKEW,
            Some(test_armor()),
        );
        let mut mctx = mech.init_request_context(&ctx).unwrap();
        let mut out = Vec::new();
        let challenge = vec![PaData::new(PaDataType::PaFxCookie, b"cookie".to_vec())];
        assert!(!mech.process(&mut ctx, &mut mctx, &challenge, &mut out).unwrap());
        assert_eq!(out, challenge);

        // Carried on a retry even if the error drops it.
        let mut retry = Vec::new();
        mech.try_again(&mut ctx, &mut mctx, PaDataType::PaFxFast, &[], &mut retry)
            .unwrap();
        assert_eq!(retry, challenge);
    }
}
