//! NTLMv2 client side of the SMB2 SESSION_SETUP exchange, wrapped in SPNEGO.

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

use crate::errors::StorageError;

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const NEGOTIATE_MESSAGE: u32 = 1;
const CHALLENGE_MESSAGE: u32 = 2;
const AUTHENTICATE_MESSAGE: u32 = 3;

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_SIGN: u32 = 0x0000_0010;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_SIGN
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// Fixed part of AUTHENTICATE without the optional Version and MIC fields.
const AUTHENTICATE_HEADER_LEN: usize = 64;

const MSV_AV_EOL: u16 = 0;
const MSV_AV_TIMESTAMP: u16 = 7;

/// 1601-01-01 (FILETIME epoch) to 1970-01-01, in microseconds.
const FILETIME_UNIX_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

// SPNEGO 1.3.6.1.5.5.2 and NTLMSSP 1.3.6.1.4.1.311.2.2.10, DER encoded
const SPNEGO_OID: &[u8] = &[0x06, 0x06, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
const NTLMSSP_OID: &[u8] = &[
    0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a,
];

pub(super) struct Credentials<'a> {
    pub user: &'a str,
    pub domain: &'a str,
    pub password: &'a str,
}

pub(super) struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

pub(super) struct Authenticate {
    pub message: Vec<u8>,
    pub session_key: [u8; 16],
}

pub(super) fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&NEGOTIATE_MESSAGE.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // empty domain and workstation fields
    msg.extend_from_slice(&[0u8; 16]);
    msg
}

impl Challenge {
    /// Locate and parse the CHALLENGE message inside a security blob. The blob
    /// may be raw NTLMSSP or a SPNEGO NegTokenResp carrying it.
    pub fn parse(blob: &[u8]) -> Result<Self, StorageError> {
        let malformed = || StorageError::connection("SMB server sent a malformed NTLM challenge");

        let start = blob
            .windows(SIGNATURE.len())
            .position(|w| w == SIGNATURE)
            .ok_or_else(|| StorageError::connection("SMB server did not offer NTLM authentication"))?;
        let msg = &blob[start..];
        if msg.len() < 48 || read_u32(msg, 8) != CHALLENGE_MESSAGE {
            return Err(malformed());
        }

        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&msg[24..32]);

        let len = read_u16(msg, 40) as usize;
        let offset = read_u32(msg, 44) as usize;
        let target_info = msg
            .get(offset..offset + len)
            .ok_or_else(malformed)?
            .to_vec();

        Ok(Challenge {
            flags: read_u32(msg, 20),
            server_challenge,
            target_info,
        })
    }

    fn timestamp(&self) -> Option<[u8; 8]> {
        let mut rest = self.target_info.as_slice();
        while rest.len() >= 4 {
            let id = u16::from_le_bytes([rest[0], rest[1]]);
            let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            let value = rest.get(4..4 + len)?;
            match id {
                MSV_AV_EOL => return None,
                MSV_AV_TIMESTAMP => return value.try_into().ok(),
                _ => rest = &rest[4 + len..],
            }
        }
        None
    }
}

/// Current time as a FILETIME.
pub(super) fn filetime_now() -> u64 {
    let micros = chrono::Utc::now().timestamp_micros() + FILETIME_UNIX_OFFSET_MICROS;
    micros.max(0) as u64 * 10
}

/// NTOWFv2: HMAC-MD5 keyed with the NT hash over UPPER(user) + domain.
fn ntowf_v2(password: &str, user: &str, domain: &str) -> Result<[u8; 16], StorageError> {
    let nt_hash = Md4::digest(utf16le(password));
    let user = utf16le(&user.to_uppercase());
    let domain = utf16le(domain);
    hmac_md5(&nt_hash, &[user.as_slice(), domain.as_slice()])
}

pub(super) fn authenticate_message(
    creds: &Credentials<'_>,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    now: u64,
) -> Result<Authenticate, StorageError> {
    let key = ntowf_v2(creds.password, creds.user, creds.domain)?;
    let server_time = challenge.timestamp();

    let mut blob = Vec::with_capacity(32 + challenge.target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&server_time.unwrap_or(now.to_le_bytes()));
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&challenge.target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let nt_proof = hmac_md5(&key, &[&challenge.server_challenge[..], &blob[..]])?;
    let session_key = hmac_md5(&key, &[&nt_proof[..]])?;
    let nt_response = [nt_proof.as_slice(), blob.as_slice()].concat();

    // with a server timestamp the LMv2 response is sent as zeros
    let lm_response = match server_time {
        Some(_) => vec![0u8; 24],
        None => {
            let lm = hmac_md5(&key, &[&challenge.server_challenge[..], &client_challenge[..]])?;
            [lm.as_slice(), client_challenge.as_slice()].concat()
        }
    };

    let domain = utf16le(creds.domain);
    let user = utf16le(creds.user);
    let fields: [&[u8]; 6] = [
        lm_response.as_slice(),
        nt_response.as_slice(),
        domain.as_slice(),
        user.as_slice(),
        &[],
        &[],
    ];

    let mut message = Vec::with_capacity(AUTHENTICATE_HEADER_LEN + 256);
    message.extend_from_slice(SIGNATURE);
    message.extend_from_slice(&AUTHENTICATE_MESSAGE.to_le_bytes());

    let mut payload = Vec::new();
    for field in fields {
        let len = u16::try_from(field.len())
            .map_err(|_| StorageError::connection("NTLM authenticate field too large"))?;
        let offset = (AUTHENTICATE_HEADER_LEN + payload.len()) as u32;
        message.extend_from_slice(&len.to_le_bytes());
        message.extend_from_slice(&len.to_le_bytes());
        message.extend_from_slice(&offset.to_le_bytes());
        payload.extend_from_slice(field);
    }
    message.extend_from_slice(&(challenge.flags & CLIENT_FLAGS).to_le_bytes());
    message.extend_from_slice(&payload);

    Ok(Authenticate {
        message,
        session_key,
    })
}

/// GSS-API InitialContextToken carrying a NegTokenInit that offers NTLMSSP.
pub(super) fn spnego_init(mech_token: &[u8]) -> Vec<u8> {
    let mech_types = der(0xa0, &der(0x30, NTLMSSP_OID));
    let token = der(0xa2, &der(0x04, mech_token));
    let neg_token_init = der(0xa0, &der(0x30, &[mech_types, token].concat()));
    der(0x60, &[SPNEGO_OID, neg_token_init.as_slice()].concat())
}

/// NegTokenResp with only a responseToken.
pub(super) fn spnego_response(token: &[u8]) -> Vec<u8> {
    der(0xa1, &der(0x30, &der(0xa2, &der(0x04, token))))
}

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], StorageError> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key)
        .map_err(|e| StorageError::Internal(anyhow::anyhow!("HMAC-MD5 key rejected: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
