//! The NTLM message envelope.
//!
//! MS-SIP transports NTLM in connectionless mode: the server sends a Challenge message unprompted
//! and the client answers with an Authenticate message. Both are base64-encoded into the
//! `gssapi-data` parameter of the SIP authentication headers; this module deals with the decoded
//! bytes.


use crate::{Flags, ParsingError, StoringError, utf16_le_bytes, utf16_le_bytes_to_string};

#[cfg(windows)]
use crate::encoding_windows::{oem_to_rust_string, rust_string_to_oem};

#[cfg(not(windows))]
use crate::encoding_utf8::{oem_to_rust_string, rust_string_to_oem};


/// The signature at the start of every NTLM message.
pub const NTLMSSP_SIGNATURE: [u8; 8] = *b"NTLMSSP\0";

pub const CHALLENGE_MESSAGE_TYPE: u32 = 0x0000_0002;
pub const AUTHENTICATE_MESSAGE_TYPE: u32 = 0x0000_0003;

/// Length of the fixed part of a Challenge message, including the version field.
const CHALLENGE_HEADER_LEN: usize = 56;

/// Length of the fixed part of an Authenticate message, including the version field.
const AUTHENTICATE_HEADER_LEN: usize = 72;


/// An NTLM message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Message {
    Challenge(ChallengeMessage),
    Authenticate(AuthenticateMessage),

    /// A message of another type, stored as the bytes following the message type.
    Other(u32, Vec<u8>),
}
impl Message {
    pub fn message_type(&self) -> u32 {
        match self {
            Self::Challenge(_) => CHALLENGE_MESSAGE_TYPE,
            Self::Authenticate(_) => AUTHENTICATE_MESSAGE_TYPE,
            Self::Other(t, _) => *t,
        }
    }

    /// Serializes the message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        match self {
            Self::Challenge(m) => m.to_bytes(),
            Self::Authenticate(m) => m.to_bytes(),
            Self::Other(t, data) => {
                let mut ret = Vec::with_capacity(12 + data.len());
                ret.extend_from_slice(&NTLMSSP_SIGNATURE);
                ret.extend_from_slice(&t.to_le_bytes());
                ret.extend_from_slice(data);
                Ok(ret)
            },
        }
    }
}
impl TryFrom<&[u8]> for Message {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match message_type(value)? {
            CHALLENGE_MESSAGE_TYPE => ChallengeMessage::try_from(value).map(Self::Challenge),
            AUTHENTICATE_MESSAGE_TYPE => AuthenticateMessage::try_from(value).map(Self::Authenticate),
            other => Ok(Self::Other(other, Vec::from(&value[12..]))),
        }
    }
}


/// The version of the sender's operating system and the NTLM revision it implements.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OsVersion {
    pub major_version: u8,
    pub minor_version: u8,
    pub build_number: u16,
    pub ntlm_revision: u8,
}
impl OsVersion {
    /// The NTLM revision implemented by Windows Server 2003 and later.
    pub const NTLMSSP_REVISION_W2K3: u8 = 0x0F;

    /// Windows Server 2003 (5.2.3790), the version reported by Office Communicator 2007 R2.
    pub const WINDOWS_SERVER_2003: Self = Self {
        major_version: 5,
        minor_version: 2,
        build_number: 3790,
        ntlm_revision: Self::NTLMSSP_REVISION_W2K3,
    };

    pub fn to_bytes(&self) -> [u8; 8] {
        let build = self.build_number.to_le_bytes();
        [
            self.major_version, self.minor_version, build[0], build[1],
            0, 0, 0, self.ntlm_revision,
        ]
    }

    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            major_version: bytes[0],
            minor_version: bytes[1],
            build_number: u16::from_le_bytes([bytes[2], bytes[3]]),
            ntlm_revision: bytes[7],
        }
    }
}


/// A security buffer: the location of a variable-length field within the payload of a message.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SecurityBuffer {
    pub length: u16,
    pub capacity: u16,
    pub offset: u32,
}
impl SecurityBuffer {
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut ret = [0u8; 8];
        ret[0..2].copy_from_slice(&self.length.to_le_bytes());
        ret[2..4].copy_from_slice(&self.capacity.to_le_bytes());
        ret[4..8].copy_from_slice(&self.offset.to_le_bytes());
        ret
    }

    /// Reads the security buffer at `position` within `message` and returns the field it points to.
    fn field_at(message: &[u8], position: usize) -> Result<&[u8], ParsingError> {
        let buffer = Self {
            length: read_u16(message, position)?,
            capacity: read_u16(message, position + 2)?,
            offset: read_u32(message, position + 4)?,
        };
        if buffer.length == 0 {
            return Ok(&[]);
        }

        let offset = buffer.offset as usize;
        let length = usize::from(buffer.length);
        let out_of_range = ParsingError::BufferOutOfRange { offset, length, message_length: message.len() };
        let end = offset.checked_add(length).ok_or_else(|| out_of_range.clone())?;
        message.get(offset..end).ok_or(out_of_range)
    }
}


/// The contents of an NTLM Challenge message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChallengeMessage {
    /// The name of the server or domain the client is authenticating against.
    pub target_name: String,

    /// The flags the server supports.
    pub flags: Flags,

    /// The server challenge (nonce).
    pub server_challenge: [u8; 8],

    /// The target information, kept exactly as sent since the NTLMv2 response must echo it.
    pub target_info: Vec<u8>,

    pub os_version: OsVersion,
}
impl ChallengeMessage {
    /// Returns a view of the target information.
    pub fn target_info(&self) -> TargetInfo<'_> {
        TargetInfo::new(&self.target_info)
    }

    /// Serializes the Challenge message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let target_name = encode_string(self.flags, &self.target_name)?;

        let mut writer = MessageWriter::new(CHALLENGE_MESSAGE_TYPE);
        let target_name_slot = writer.reserve_buffer();
        writer.put(&self.flags.bits().to_le_bytes());
        writer.put(&self.server_challenge);
        writer.put(&[0u8; 8]); // reserved
        let target_info_slot = writer.reserve_buffer();
        writer.put(&self.os_version.to_bytes());

        writer.fill_buffer(target_name_slot, &target_name)?;
        writer.fill_buffer(target_info_slot, &self.target_info)?;
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for ChallengeMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        expect_message_type(value, CHALLENGE_MESSAGE_TYPE)?;
        if value.len() < CHALLENGE_HEADER_LEN - 8 {
            return Err(ParsingError::ShortHeader { expected_min_len: CHALLENGE_HEADER_LEN - 8, obtained_len: value.len() });
        }

        let flags = Flags::from_bits_retain(read_u32(value, 20)?);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&value[24..32]);
        let os_version = read_os_version(value, flags, CHALLENGE_HEADER_LEN - 8)?;

        let target_name = decode_string(flags, SecurityBuffer::field_at(value, 12)?)?;
        let target_info = Vec::from(SecurityBuffer::field_at(value, 40)?);

        Ok(Self {
            target_name,
            flags,
            server_challenge,
            target_info,
            os_version,
        })
    }
}


/// The contents of an NTLM Authenticate message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AuthenticateMessage {
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain_name: String,
    pub user_name: String,
    pub workstation_name: String,

    /// The exported session key, encrypted with the key exchange key; empty unless key exchange was
    /// negotiated.
    pub encrypted_session_key: Vec<u8>,

    pub flags: Flags,
    pub os_version: OsVersion,
}
impl AuthenticateMessage {
    /// Serializes the Authenticate message into bytes.
    ///
    /// The fields are stored in the order Office Communicator stores them: the names first, then
    /// the responses, then the encrypted session key.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let domain_name = encode_string(self.flags, &self.domain_name)?;
        let user_name = encode_string(self.flags, &self.user_name)?;
        let workstation_name = encode_string(self.flags, &self.workstation_name)?;

        let mut writer = MessageWriter::new(AUTHENTICATE_MESSAGE_TYPE);
        let lm_slot = writer.reserve_buffer();
        let nt_slot = writer.reserve_buffer();
        let domain_slot = writer.reserve_buffer();
        let user_slot = writer.reserve_buffer();
        let workstation_slot = writer.reserve_buffer();
        let session_key_slot = writer.reserve_buffer();
        writer.put(&self.flags.bits().to_le_bytes());
        writer.put(&self.os_version.to_bytes());

        writer.fill_buffer(domain_slot, &domain_name)?;
        writer.fill_buffer(user_slot, &user_name)?;
        writer.fill_buffer(workstation_slot, &workstation_name)?;
        writer.fill_buffer(lm_slot, &self.lm_response)?;
        writer.fill_buffer(nt_slot, &self.nt_response)?;
        writer.fill_buffer(session_key_slot, &self.encrypted_session_key)?;
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for AuthenticateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        expect_message_type(value, AUTHENTICATE_MESSAGE_TYPE)?;
        if value.len() < AUTHENTICATE_HEADER_LEN - 8 {
            return Err(ParsingError::ShortHeader { expected_min_len: AUTHENTICATE_HEADER_LEN - 8, obtained_len: value.len() });
        }

        let flags = Flags::from_bits_retain(read_u32(value, 60)?);
        let os_version = read_os_version(value, flags, AUTHENTICATE_HEADER_LEN - 8)?;

        Ok(Self {
            lm_response: Vec::from(SecurityBuffer::field_at(value, 12)?),
            nt_response: Vec::from(SecurityBuffer::field_at(value, 20)?),
            domain_name: decode_string(flags, SecurityBuffer::field_at(value, 28)?)?,
            user_name: decode_string(flags, SecurityBuffer::field_at(value, 36)?)?,
            workstation_name: decode_string(flags, SecurityBuffer::field_at(value, 44)?)?,
            encrypted_session_key: Vec::from(SecurityBuffer::field_at(value, 52)?),
            flags,
            os_version,
        })
    }
}


/// The identifier of an attribute-value pair in the target information.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AvId {
    Eol,
    NbComputerName,
    NbDomainName,
    DnsComputerName,
    DnsDomainName,
    DnsTreeName,
    Flags,
    Timestamp,
    SingleHost,
    TargetName,
    ChannelBindings,
    Unknown(u16),
}
impl From<u16> for AvId {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => Self::Eol,
            0x0001 => Self::NbComputerName,
            0x0002 => Self::NbDomainName,
            0x0003 => Self::DnsComputerName,
            0x0004 => Self::DnsDomainName,
            0x0005 => Self::DnsTreeName,
            0x0006 => Self::Flags,
            0x0007 => Self::Timestamp,
            0x0008 => Self::SingleHost,
            0x0009 => Self::TargetName,
            0x000A => Self::ChannelBindings,
            other => Self::Unknown(other),
        }
    }
}
impl From<AvId> for u16 {
    fn from(value: AvId) -> Self {
        match value {
            AvId::Eol => 0x0000,
            AvId::NbComputerName => 0x0001,
            AvId::NbDomainName => 0x0002,
            AvId::DnsComputerName => 0x0003,
            AvId::DnsDomainName => 0x0004,
            AvId::DnsTreeName => 0x0005,
            AvId::Flags => 0x0006,
            AvId::Timestamp => 0x0007,
            AvId::SingleHost => 0x0008,
            AvId::TargetName => 0x0009,
            AvId::ChannelBindings => 0x000A,
            AvId::Unknown(other) => other,
        }
    }
}


/// An attribute-value pair of the target information.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AvPair<'a> {
    pub id: AvId,
    pub value: &'a [u8],
}
impl<'a> AvPair<'a> {
    /// Decodes the value of a name-valued pair, which is always UTF-16.
    pub fn value_string(&self) -> Result<String, ParsingError> {
        utf16_le_bytes_to_string(self.value)
    }
}


/// A read-only view of target information as sent by the server.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TargetInfo<'a> {
    bytes: &'a [u8],
}
impl<'a> TargetInfo<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Iterates over the attribute-value pairs up to (excluding) the end-of-list marker.
    pub fn pairs(&self) -> AvPairs<'a> {
        AvPairs { rest: self.bytes }
    }

    /// Returns the value of the first pair with the given identifier.
    pub fn find(&self, id: AvId) -> Option<&'a [u8]> {
        self.pairs()
            .map_while(|p| p.ok())
            .find(|p| p.id == id)
            .map(|p| p.value)
    }

    /// Returns the server's timestamp, if the server sent one.
    pub fn timestamp(&self) -> Option<u64> {
        let value = self.find(AvId::Timestamp)?;
        let bytes: [u8; 8] = value.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    /// Encodes attribute-value pairs into target information, appending the end-of-list marker.
    pub fn encode(pairs: &[(AvId, &[u8])]) -> Result<Vec<u8>, StoringError> {
        let mut ret = Vec::new();
        for (id, value) in pairs {
            let length: u16 = value.len().try_into()
                .map_err(|_| StoringError::FieldTooLong { length: value.len() })?;
            ret.extend_from_slice(&u16::from(*id).to_le_bytes());
            ret.extend_from_slice(&length.to_le_bytes());
            ret.extend_from_slice(value);
        }
        ret.extend_from_slice(&[0u8; 4]);
        Ok(ret)
    }
}

/// Iterator over the attribute-value pairs of target information.
///
/// Yields an error and stops if a pair extends beyond the end of the data.
#[derive(Clone, Debug)]
pub struct AvPairs<'a> {
    rest: &'a [u8],
}
impl<'a> Iterator for AvPairs<'a> {
    type Item = Result<AvPair<'a>, ParsingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < 4 {
            let err = ParsingError::ItemMinLengthMismatch { expected_at_least: 4, obtained: self.rest.len() };
            self.rest = &[];
            return Some(Err(err));
        }

        let id = AvId::from(u16::from_le_bytes([self.rest[0], self.rest[1]]));
        let length = usize::from(u16::from_le_bytes([self.rest[2], self.rest[3]]));
        if id == AvId::Eol {
            self.rest = &[];
            return None;
        }
        if self.rest.len() < 4 + length {
            let err = ParsingError::ItemMinLengthMismatch { expected_at_least: 4 + length, obtained: self.rest.len() };
            self.rest = &[];
            return Some(Err(err));
        }

        let value = &self.rest[4..4+length];
        self.rest = &self.rest[4+length..];
        Some(Ok(AvPair { id, value }))
    }
}


/// Builds a message: the fixed header first, then the payload fields the header points to.
struct MessageWriter {
    bytes: Vec<u8>,
}

/// The position of a reserved security buffer in the header.
#[derive(Clone, Copy)]
struct BufferSlot(usize);

impl MessageWriter {
    fn new(message_type: u32) -> Self {
        let mut bytes = Vec::with_capacity(AUTHENTICATE_HEADER_LEN);
        bytes.extend_from_slice(&NTLMSSP_SIGNATURE);
        bytes.extend_from_slice(&message_type.to_le_bytes());
        Self { bytes }
    }

    fn put(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    fn reserve_buffer(&mut self) -> BufferSlot {
        let slot = BufferSlot(self.bytes.len());
        self.bytes.extend_from_slice(&[0u8; 8]);
        slot
    }

    /// Appends the field to the payload and points the reserved security buffer at it.
    ///
    /// Must only be called once the header is complete.
    fn fill_buffer(&mut self, slot: BufferSlot, data: &[u8]) -> Result<(), StoringError> {
        let too_long = || StoringError::FieldTooLong { length: data.len() };
        let length: u16 = data.len().try_into().map_err(|_| too_long())?;
        let offset: u32 = self.bytes.len().try_into().map_err(|_| too_long())?;
        let buffer = SecurityBuffer {
            length,
            capacity: length,
            offset,
        };
        self.bytes[slot.0..slot.0+8].copy_from_slice(&buffer.to_bytes());
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}


fn read_u16(bytes: &[u8], position: usize) -> Result<u16, ParsingError> {
    bytes.get(position..position+2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(ParsingError::ShortHeader { expected_min_len: position + 2, obtained_len: bytes.len() })
}

fn read_u32(bytes: &[u8], position: usize) -> Result<u32, ParsingError> {
    bytes.get(position..position+4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(ParsingError::ShortHeader { expected_min_len: position + 4, obtained_len: bytes.len() })
}

fn read_os_version(bytes: &[u8], flags: Flags, position: usize) -> Result<OsVersion, ParsingError> {
    if !flags.contains(Flags::NEGOTIATE_VERSION) {
        return Ok(OsVersion::default());
    }
    let mut version = [0u8; 8];
    let slice = bytes.get(position..position+8)
        .ok_or(ParsingError::ShortHeader { expected_min_len: position + 8, obtained_len: bytes.len() })?;
    version.copy_from_slice(slice);
    Ok(OsVersion::from_bytes(&version))
}

/// Checks the signature and returns the message type.
fn message_type(bytes: &[u8]) -> Result<u32, ParsingError> {
    if bytes.len() < 12 {
        return Err(ParsingError::ShortHeader { expected_min_len: 12, obtained_len: bytes.len() });
    }
    if bytes[0..8] != NTLMSSP_SIGNATURE {
        return Err(ParsingError::MagicMismatch { expected: NTLMSSP_SIGNATURE, obtained: Vec::from(&bytes[0..8]) });
    }
    read_u32(bytes, 8)
}

fn expect_message_type(bytes: &[u8], expected: u32) -> Result<(), ParsingError> {
    let obtained = message_type(bytes)?;
    if obtained != expected {
        return Err(ParsingError::UnexpectedMessageType { expected, obtained });
    }
    Ok(())
}

fn encode_string(flags: Flags, string: &str) -> Result<Vec<u8>, StoringError> {
    if flags.contains(Flags::NEGOTIATE_UNICODE) {
        Ok(utf16_le_bytes(string))
    } else if flags.contains(Flags::NEGOTIATE_OEM) {
        rust_string_to_oem(string)
            .ok_or_else(|| StoringError::NonOemEncodable { string: string.to_owned() })
    } else {
        Err(StoringError::NeitherUnicodeNorOem)
    }
}

fn decode_string(flags: Flags, bytes: &[u8]) -> Result<String, ParsingError> {
    if flags.contains(Flags::NEGOTIATE_UNICODE) {
        utf16_le_bytes_to_string(bytes)
    } else if flags.contains(Flags::NEGOTIATE_OEM) {
        oem_to_rust_string(bytes)
            .ok_or_else(|| ParsingError::InvalidOemEncoding { value: Vec::from(bytes) })
    } else {
        Err(ParsingError::NeitherUnicodeNorOem)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const TARGET_INFO: [u8; 36] = hex!("
        02000c0044006f006d00610069006e00
        01000c005300650072007600650072000000
        0000
    ");

    fn challenge() -> ChallengeMessage {
        ChallengeMessage {
            target_name: "Domain".to_owned(),
            flags: Flags::from_bits_retain(0xE28A8233),
            server_challenge: hex!("0123456789abcdef"),
            target_info: Vec::from(&TARGET_INFO[..]),
            os_version: OsVersion {
                major_version: 6,
                minor_version: 0,
                build_number: 6000,
                ntlm_revision: OsVersion::NTLMSSP_REVISION_W2K3,
            },
        }
    }

    #[test]
    fn test_challenge_layout() {
        let bytes = challenge().to_bytes().unwrap();
        assert_eq!(&bytes[0..12], b"NTLMSSP\0\x02\0\0\0");
        // target name: 12 bytes at offset 56
        assert_eq!(&bytes[12..20], hex!("0c000c0038000000"));
        assert_eq!(&bytes[20..24], hex!("3382 8ae2"));
        assert_eq!(&bytes[24..32], hex!("0123456789abcdef"));
        assert_eq!(&bytes[32..40], [0u8; 8]);
        // target info: 36 bytes at offset 68
        assert_eq!(&bytes[40..48], hex!("2400240044000000"));
        assert_eq!(&bytes[48..56], hex!("060070170000000f"));
        assert_eq!(&bytes[56..68], b"D\0o\0m\0a\0i\0n\0");
        assert_eq!(&bytes[68..], TARGET_INFO);

        let parsed = ChallengeMessage::try_from(&bytes[..]).unwrap();
        assert_eq!(parsed, challenge());
    }

    #[test]
    fn test_authenticate_round_trip() {
        let auth = AuthenticateMessage {
            lm_response: vec![0x11; 24],
            nt_response: vec![0x22; 60],
            domain_name: "Domain".to_owned(),
            user_name: "User".to_owned(),
            workstation_name: "COMPUTER".to_owned(),
            encrypted_session_key: vec![0x33; 16],
            flags: Flags::from_bits_retain(0xE28A8233),
            os_version: OsVersion::WINDOWS_SERVER_2003,
        };
        let bytes = auth.to_bytes().unwrap();
        assert_eq!(bytes.len(), 72 + 12 + 8 + 16 + 24 + 60 + 16);
        // the domain name is the first payload field
        assert_eq!(&bytes[28..36], hex!("0c000c0048000000"));
        // the LM response follows the workstation name
        assert_eq!(&bytes[12..20], hex!("180018006c000000"));
        assert_eq!(&bytes[64..72], hex!("0502ce0e0000000f"));

        let parsed = Message::try_from(&bytes[..]).unwrap();
        assert_eq!(parsed, Message::Authenticate(auth));
    }

    #[test]
    fn test_oem_strings() {
        let auth = AuthenticateMessage {
            lm_response: vec![0x11; 24],
            nt_response: vec![0x22; 24],
            domain_name: "DOMAIN".to_owned(),
            user_name: "user".to_owned(),
            workstation_name: String::new(),
            encrypted_session_key: Vec::new(),
            flags: Flags::NEGOTIATE_OEM | Flags::NEGOTIATE_NTLM,
            os_version: OsVersion::default(),
        };
        let bytes = auth.to_bytes().unwrap();
        assert_eq!(&bytes[72..82], b"DOMAINuser");
        assert_eq!(AuthenticateMessage::try_from(&bytes[..]).unwrap(), auth);
    }

    #[test]
    fn test_no_charset() {
        let mut c = challenge();
        c.flags = Flags::NEGOTIATE_NTLM;
        assert_eq!(c.to_bytes(), Err(StoringError::NeitherUnicodeNorOem));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Message::try_from(&b"NTLMSSP\0"[..]),
            Err(ParsingError::ShortHeader { expected_min_len: 12, obtained_len: 8 }),
        );
        assert_eq!(
            Message::try_from(&b"NTLMSSQ\0\x02\0\0\0"[..]),
            Err(ParsingError::MagicMismatch { expected: NTLMSSP_SIGNATURE, obtained: Vec::from(&b"NTLMSSQ\0"[..]) }),
        );
        assert_eq!(
            ChallengeMessage::try_from(&b"NTLMSSP\0\x03\0\0\0"[..]),
            Err(ParsingError::UnexpectedMessageType { expected: 2, obtained: 3 }),
        );
        assert_eq!(
            ChallengeMessage::try_from(&b"NTLMSSP\0\x02\0\0\0"[..]),
            Err(ParsingError::ShortHeader { expected_min_len: 48, obtained_len: 12 }),
        );

        let mut bytes = challenge().to_bytes().unwrap();
        // point the target info beyond the end of the message
        bytes[44..48].copy_from_slice(&1000u32.to_le_bytes());
        assert_eq!(
            ChallengeMessage::try_from(&bytes[..]),
            Err(ParsingError::BufferOutOfRange { offset: 1000, length: 36, message_length: 104 }),
        );
    }

    #[test]
    fn test_other_message_kept_raw() {
        let bytes = b"NTLMSSP\0\x01\0\0\0\x07\x82\x08\xa2";
        let msg = Message::try_from(&bytes[..]).unwrap();
        assert_eq!(msg, Message::Other(1, vec![0x07, 0x82, 0x08, 0xa2]));
        assert_eq!(msg.message_type(), 1);
        assert_eq!(msg.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_target_info_pairs() {
        let ti = TargetInfo::new(&TARGET_INFO);
        let pairs: Vec<AvPair> = ti.pairs().collect::<Result<_, _>>().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].id, AvId::NbDomainName);
        assert_eq!(pairs[0].value_string().unwrap(), "Domain");
        assert_eq!(pairs[1].id, AvId::NbComputerName);
        assert_eq!(pairs[1].value_string().unwrap(), "Server");
        assert_eq!(ti.timestamp(), None);

        let encoded = TargetInfo::encode(&[
            (AvId::NbDomainName, pairs[0].value),
            (AvId::NbComputerName, pairs[1].value),
        ]).unwrap();
        assert_eq!(encoded, TARGET_INFO);
    }

    #[test]
    fn test_target_info_timestamp() {
        let time = 0x01CAB927179A5159u64.to_le_bytes();
        let encoded = TargetInfo::encode(&[(AvId::Timestamp, &time[..])]).unwrap();
        assert_eq!(TargetInfo::new(&encoded).timestamp(), Some(0x01CAB927179A5159));
    }

    #[test]
    fn test_target_info_truncated() {
        let ti = TargetInfo::new(&TARGET_INFO[0..10]);
        let mut pairs = ti.pairs();
        assert!(matches!(pairs.next(), Some(Err(ParsingError::ItemMinLengthMismatch { .. }))));
        assert!(pairs.next().is_none());
        assert_eq!(ti.find(AvId::NbDomainName), None);
    }
}
