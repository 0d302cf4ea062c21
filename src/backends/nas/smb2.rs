//! SMB2 framing: NetBIOS session transport, the 64-byte sync header, the three
//! requests the connection check sends, and message signing.

use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::StorageError;

const MAGIC: &[u8; 4] = b"\xFESMB";
const SMB1_MAGIC: &[u8; 4] = b"\xFFSMB";
const HEADER_LEN: usize = 64;
pub(super) const DIALECTS: [u16; 4] = [0x0202, 0x0210, 0x0300, 0x0302];
const MAX_MESSAGE_LEN: usize = 64 * 1024;

const FLAGS_SIGNED: u32 = 0x0000_0008;
const SIGNATURE_RANGE: std::ops::Range<usize> = 48..64;

pub(super) const STATUS_SUCCESS: u32 = 0;
pub(super) const STATUS_PENDING: u32 = 0x0000_0103;
pub(super) const STATUS_MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;
pub(super) const STATUS_ACCESS_DENIED: u32 = 0xC000_0022;
pub(super) const STATUS_LOGON_FAILURE: u32 = 0xC000_006D;
pub(super) const STATUS_BAD_NETWORK_NAME: u32 = 0xC000_00CC;

pub(super) const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
pub(super) const SESSION_FLAG_IS_NULL: u16 = 0x0002;
pub(super) const SESSION_FLAG_ENCRYPT_DATA: u16 = 0x0004;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(super) enum Command {
    Negotiate = 0x0000,
    SessionSetup = 0x0001,
    TreeConnect = 0x0003,
}

/// Human-readable form of the NTSTATUS codes the connection check reports.
pub(super) fn describe_status(status: u32) -> String {
    let name = match status {
        STATUS_ACCESS_DENIED => Some("STATUS_ACCESS_DENIED"),
        STATUS_LOGON_FAILURE => Some("STATUS_LOGON_FAILURE"),
        STATUS_BAD_NETWORK_NAME => Some("STATUS_BAD_NETWORK_NAME"),
        0xC000_0071 => Some("STATUS_PASSWORD_EXPIRED"),
        0xC000_0072 => Some("STATUS_ACCOUNT_DISABLED"),
        0xC000_0234 => Some("STATUS_ACCOUNT_LOCKED_OUT"),
        0xC000_00BB => Some("STATUS_NOT_SUPPORTED"),
        _ => None,
    };
    match name {
        Some(name) => format!("0x{:08X} {}", status, name),
        None => format!("0x{:08X}", status),
    }
}

fn header(command: Command, message_id: u64, session_id: u64) -> Vec<u8> {
    let mut h = Vec::with_capacity(HEADER_LEN);
    h.extend_from_slice(MAGIC);
    h.extend_from_slice(&(HEADER_LEN as u16).to_le_bytes());
    h.extend_from_slice(&0u16.to_le_bytes()); // credit charge
    h.extend_from_slice(&0u32.to_le_bytes()); // status
    h.extend_from_slice(&(command as u16).to_le_bytes());
    h.extend_from_slice(&1u16.to_le_bytes()); // credits requested
    h.extend_from_slice(&0u32.to_le_bytes()); // flags
    h.extend_from_slice(&0u32.to_le_bytes()); // next command
    h.extend_from_slice(&message_id.to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes()); // process id
    h.extend_from_slice(&0u32.to_le_bytes()); // tree id
    h.extend_from_slice(&session_id.to_le_bytes());
    h.extend_from_slice(&[0u8; 16]); // signature
    h
}

/// NEGOTIATE offering the 2.x and 3.0.x dialects.
pub(super) fn negotiate_request(message_id: u64, client_guid: &[u8; 16]) -> Vec<u8> {
    let mut msg = header(Command::Negotiate, message_id, 0);
    msg.extend_from_slice(&36u16.to_le_bytes());
    msg.extend_from_slice(&(DIALECTS.len() as u16).to_le_bytes());
    msg.extend_from_slice(&1u16.to_le_bytes()); // signing enabled
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg.extend_from_slice(&0u32.to_le_bytes()); // capabilities
    msg.extend_from_slice(client_guid);
    msg.extend_from_slice(&0u64.to_le_bytes()); // client start time
    for dialect in DIALECTS {
        msg.extend_from_slice(&dialect.to_le_bytes());
    }
    msg
}

pub(super) fn session_setup_request(message_id: u64, session_id: u64, security_blob: &[u8]) -> Vec<u8> {
    let mut msg = header(Command::SessionSetup, message_id, session_id);
    msg.extend_from_slice(&25u16.to_le_bytes());
    msg.push(0); // flags
    msg.push(1); // security mode: signing enabled
    msg.extend_from_slice(&0u32.to_le_bytes()); // capabilities
    msg.extend_from_slice(&0u32.to_le_bytes()); // channel
    msg.extend_from_slice(&((HEADER_LEN + 24) as u16).to_le_bytes());
    msg.extend_from_slice(&(security_blob.len() as u16).to_le_bytes());
    msg.extend_from_slice(&0u64.to_le_bytes()); // previous session id
    msg.extend_from_slice(security_blob);
    msg
}

pub(super) fn tree_connect_request(message_id: u64, session_id: u64, unc_path: &str) -> Vec<u8> {
    let path: Vec<u8> = unc_path.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut msg = header(Command::TreeConnect, message_id, session_id);
    msg.extend_from_slice(&9u16.to_le_bytes());
    msg.extend_from_slice(&0u16.to_le_bytes()); // flags
    msg.extend_from_slice(&((HEADER_LEN + 8) as u16).to_le_bytes());
    msg.extend_from_slice(&(path.len() as u16).to_le_bytes());
    msg.extend_from_slice(&path);
    msg
}

/// A received SMB2 message, header included.
pub(super) struct Response {
    raw: Vec<u8>,
}

impl Response {
    pub fn parse(raw: Vec<u8>) -> Result<Self, StorageError> {
        if raw.len() >= 4 && &raw[..4] == SMB1_MAGIC {
            return Err(StorageError::connection(
                "NAS only speaks SMB1, which is not supported",
            ));
        }
        if raw.len() < HEADER_LEN || &raw[..4] != MAGIC {
            return Err(StorageError::connection(
                "host did not answer with an SMB2 response",
            ));
        }
        Ok(Response { raw })
    }

    pub fn status(&self) -> u32 {
        read_u32(&self.raw, 8)
    }

    pub fn session_id(&self) -> u64 {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.raw[40..48]);
        u64::from_le_bytes(id)
    }

    fn body_u16(&self, at: usize) -> Result<u16, StorageError> {
        let at = HEADER_LEN + at;
        self.raw
            .get(at..at + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .ok_or_else(|| StorageError::connection("truncated SMB2 response body"))
    }

    /// NEGOTIATE response: (security mode, dialect).
    pub fn negotiated(&self) -> Result<(u16, u16), StorageError> {
        Ok((self.body_u16(2)?, self.body_u16(4)?))
    }

    pub fn session_flags(&self) -> Result<u16, StorageError> {
        self.body_u16(2)
    }

    /// SESSION_SETUP response security buffer. The offset counts from the
    /// start of the SMB2 header.
    pub fn security_buffer(&self) -> Result<&[u8], StorageError> {
        let offset = self.body_u16(4)? as usize;
        let len = self.body_u16(6)? as usize;
        self.raw
            .get(offset..offset + len)
            .ok_or_else(|| StorageError::connection("SMB2 security buffer out of bounds"))
    }
}

pub(super) async fn send<S>(stream: &mut S, message: &[u8]) -> Result<(), StorageError>
where
    S: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(4 + message.len());
    frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
    frame.extend_from_slice(message);
    stream
        .write_all(&frame)
        .await
        .map_err(|e| StorageError::connection(format!("failed to send SMB request: {}", e)))
}

/// Read the next final response, skipping interim STATUS_PENDING replies.
pub(super) async fn recv<S>(stream: &mut S) -> Result<Response, StorageError>
where
    S: AsyncRead + Unpin,
{
    loop {
        let mut frame = [0u8; 4];
        stream
            .read_exact(&mut frame)
            .await
            .map_err(|e| StorageError::connection(format!("NAS closed the SMB connection: {}", e)))?;
        let len = u32::from_be_bytes([0, frame[1], frame[2], frame[3]]) as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(StorageError::connection("NAS sent an oversized SMB response"));
        }

        let mut raw = vec![0u8; len];
        stream
            .read_exact(&mut raw)
            .await
            .map_err(|e| StorageError::connection(format!("truncated SMB response: {}", e)))?;

        let response = Response::parse(raw)?;
        if response.status() != STATUS_PENDING {
            return Ok(response);
        }
    }
}

/// Per-session signing key and algorithm, chosen by dialect.
pub(super) enum Signer {
    HmacSha256([u8; 16]),
    AesCmac([u8; 16]),
}

impl Signer {
    pub fn new(dialect: u16, session_key: &[u8; 16]) -> Result<Self, StorageError> {
        if dialect >= 0x0300 {
            Ok(Signer::AesCmac(smb3_signing_key(session_key)?))
        } else {
            Ok(Signer::HmacSha256(*session_key))
        }
    }

    /// Set the SIGNED flag and write the signature into the header.
    pub fn sign(&self, message: &mut [u8]) -> Result<(), StorageError> {
        let flags = read_u32(message, 16) | FLAGS_SIGNED;
        message[16..20].copy_from_slice(&flags.to_le_bytes());
        message[SIGNATURE_RANGE].fill(0);

        let signature: [u8; 16] = match self {
            Signer::HmacSha256(key) => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(key_error)?;
                mac.update(message);
                let full = mac.finalize().into_bytes();
                let mut truncated = [0u8; 16];
                truncated.copy_from_slice(&full[..16]);
                truncated
            }
            Signer::AesCmac(key) => {
                let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(key_error)?;
                mac.update(message);
                mac.finalize().into_bytes().into()
            }
        };
        message[SIGNATURE_RANGE].copy_from_slice(&signature);
        Ok(())
    }
}

/// SP800-108 counter-mode KDF with HMAC-SHA256, label "SMB2AESCMAC", context "SmbSign".
fn smb3_signing_key(session_key: &[u8; 16]) -> Result<[u8; 16], StorageError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(session_key).map_err(key_error)?;
    mac.update(&1u32.to_be_bytes());
    mac.update(b"SMB2AESCMAC\0");
    mac.update(&[0]);
    mac.update(b"SmbSign\0");
    mac.update(&128u32.to_be_bytes());
    let full = mac.finalize().into_bytes();
    let mut key = [0u8; 16];
    key.copy_from_slice(&full[..16]);
    Ok(key)
}

fn key_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Internal(anyhow::anyhow!("SMB signing key rejected: {}", e))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
