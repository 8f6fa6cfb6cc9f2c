//! Proxy-DHCP responder (spec.md §4.2).
//!
//! Classifies PXE clients from DHCP option 93 (client system architecture),
//! option 77 (user class), and option 175 (iPXE marker), then answers with
//! a BOOTREPLY steering the client to its next boot artifact. No IP leasing
//! happens here; a separate DHCP server still assigns the client's address.

use crate::error::PxeError;
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode, UnknownOption};
use dhcproto::{Decodable, Decoder, Encodable, Encoder};
use std::net::Ipv4Addr;

/// DHCP option 93: client system architecture.
const OPT_CLIENT_ARCH: u8 = 93;
/// DHCP option 77: user class.
const OPT_USER_CLASS: u8 = 77;
/// DHCP option 175: PXE-specific vendor extension; presence alone signals
/// an iPXE client (spec.md §4.2).
const OPT_PXE_EXTENSION: u8 = 175;

/// Client firmware architecture, as classified from option 93.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientArchitecture {
    /// Legacy PC BIOS (architecture code 0, or anything unrecognised).
    Bios,
    /// UEFI x86-64 (architecture codes 7 and 9).
    UefiX64,
}

impl ClientArchitecture {
    fn from_code(code: u16) -> Self {
        match code {
            7 | 9 => Self::UefiX64,
            _ => Self::Bios,
        }
    }

    /// The TFTP-relative stage-1 binary path for this architecture (spec.md
    /// §6 "Persisted state layout").
    #[must_use]
    pub fn stage1_path(self) -> &'static str {
        match self {
            Self::Bios => "bios/undionly.kpxe",
            Self::UefiX64 => "uefi/ipxe.efi",
        }
    }
}

/// Classification derived from a single BOOTREQUEST (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientClass {
    /// Architecture from option 93.
    pub architecture: ClientArchitecture,
    /// Whether the client already identifies as iPXE (option 77 = "iPXE",
    /// or option 175 present).
    pub is_ipxe: bool,
}

fn raw_option(message: &Message, code: u8) -> Option<&[u8]> {
    match message.opts().get(OptionCode::Unknown(code)) {
        Some(DhcpOption::Unknown(unknown)) => Some(unknown.data()),
        _ => None,
    }
}

/// Classify a decoded BOOTREQUEST.
#[must_use]
pub fn classify(message: &Message) -> ClientClass {
    let architecture = raw_option(message, OPT_CLIENT_ARCH)
        .filter(|data| data.len() >= 2)
        .map_or(ClientArchitecture::Bios, |data| ClientArchitecture::from_code(u16::from_be_bytes([data[0], data[1]])));

    let user_class_is_ipxe = raw_option(message, OPT_USER_CLASS).is_some_and(|data| data.windows(4).any(|w| w == b"iPXE"));
    let has_pxe_extension = raw_option(message, OPT_PXE_EXTENSION).is_some();

    ClientClass {
        architecture,
        is_ipxe: user_class_is_ipxe || has_pxe_extension,
    }
}

/// What the responder decided to hand the client.
#[derive(Debug, Clone)]
pub enum BootTarget {
    /// TFTP path to a stage-1 binary (raw firmware client).
    Tftp(String),
    /// HTTP URL to a rendered iPXE script (client is already iPXE).
    Http(String),
}

/// Build the BOOTREPLY for a classified client (spec.md §4.2 "Response
/// policy"). `server_ip` populates both the server-identifier option and
/// the TFTP server-name option; `boot_server_address` is the HTTP base URL
/// used when the client already identifies as iPXE.
///
/// # Errors
///
/// Returns [`PxeError::Dhcp`] if the request cannot be re-encoded.
pub fn build_reply(
    request: &Message,
    class: ClientClass,
    server_ip: Ipv4Addr,
    boot_server_address: &str,
) -> Result<Message, PxeError> {
    let target = if class.is_ipxe {
        BootTarget::Http(format!("http://{boot_server_address}/api/v1/ipxe/boot.ipxe"))
    } else {
        BootTarget::Tftp(class.architecture.stage1_path().to_string())
    };

    let mut reply = Message::default();
    reply.set_opcode(Opcode::BootReply);
    reply.set_htype(request.htype());
    reply.set_xid(request.xid());
    reply.set_flags(request.flags());
    reply.set_chaddr(request.chaddr());
    reply.set_giaddr(request.giaddr());

    reply.opts_mut().insert(DhcpOption::MessageType(MessageType::Offer));
    reply.opts_mut().insert(DhcpOption::ServerIdentifier(server_ip));

    match &target {
        BootTarget::Tftp(path) => {
            reply.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(
                OptionCode::Unknown(66),
                server_ip.to_string().into_bytes(),
            )));
            reply
                .opts_mut()
                .insert(DhcpOption::Unknown(UnknownOption::new(OptionCode::Unknown(67), path.clone().into_bytes())));
            reply.set_fname_str(path).map_err(|error| PxeError::Dhcp(error.to_string()))?;
        }
        BootTarget::Http(url) => {
            reply
                .opts_mut()
                .insert(DhcpOption::Unknown(UnknownOption::new(OptionCode::Unknown(67), url.clone().into_bytes())));
        }
    }

    reply.opts_mut().insert(DhcpOption::End);
    Ok(reply)
}

/// Decode a raw BOOTREQUEST datagram.
///
/// # Errors
///
/// Returns [`PxeError::Dhcp`] if `buf` is not a well-formed DHCP message.
pub fn decode_request(buf: &[u8]) -> Result<Message, PxeError> {
    Message::decode(&mut Decoder::new(buf)).map_err(|error| PxeError::Dhcp(error.to_string()))
}

/// Encode a reply for transmission. The result is padded to at least 300
/// bytes per spec.md §6, matching what older PXE ROMs expect.
///
/// # Errors
///
/// Returns [`PxeError::Dhcp`] if encoding fails.
pub fn encode_reply(reply: &Message) -> Result<Vec<u8>, PxeError> {
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);
    reply.encode(&mut encoder).map_err(|error| PxeError::Dhcp(error.to_string()))?;
    if buf.len() < 300 {
        buf.resize(300, 0);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v4::Htype;

    fn request_with_options(arch_code: Option<u16>, user_class: Option<&[u8]>, pxe_ext: bool) -> Message {
        let mut message = Message::default();
        message.set_opcode(Opcode::BootRequest);
        message.set_htype(Htype::Eth);
        message.set_xid(0x1234_5678);
        message.set_chaddr(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

        if let Some(code) = arch_code {
            message
                .opts_mut()
                .insert(DhcpOption::Unknown(UnknownOption::new(OptionCode::Unknown(OPT_CLIENT_ARCH), code.to_be_bytes().to_vec())));
        }
        if let Some(uc) = user_class {
            message
                .opts_mut()
                .insert(DhcpOption::Unknown(UnknownOption::new(OptionCode::Unknown(OPT_USER_CLASS), uc.to_vec())));
        }
        if pxe_ext {
            message
                .opts_mut()
                .insert(DhcpOption::Unknown(UnknownOption::new(OptionCode::Unknown(OPT_PXE_EXTENSION), vec![0])));
        }
        message
    }

    #[test]
    fn classifies_bios_client_with_no_architecture_option() {
        let request = request_with_options(None, None, false);
        let class = classify(&request);
        assert_eq!(class.architecture, ClientArchitecture::Bios);
        assert!(!class.is_ipxe);
    }

    #[test]
    fn classifies_uefi_x64_client() {
        let request = request_with_options(Some(7), None, false);
        assert_eq!(classify(&request).architecture, ClientArchitecture::UefiX64);
    }

    #[test]
    fn recognises_ipxe_via_user_class() {
        let request = request_with_options(Some(0), Some(b"iPXE"), false);
        assert!(classify(&request).is_ipxe);
    }

    #[test]
    fn recognises_ipxe_via_option_175_presence() {
        let request = request_with_options(Some(0), None, true);
        assert!(classify(&request).is_ipxe);
    }

    #[test]
    fn raw_bios_reply_points_at_tftp_stage1() {
        let request = request_with_options(Some(0), None, false);
        let class = classify(&request);
        let reply = build_reply(&request, class, Ipv4Addr::new(10, 0, 0, 1), "10.0.0.1:8080").expect("build reply");

        match raw_option(&reply, 67) {
            Some(data) => assert_eq!(data, b"bios/undionly.kpxe"),
            None => panic!("expected option 67"),
        }
        assert_eq!(reply.xid(), 0x1234_5678);
    }

    #[test]
    fn ipxe_reply_points_at_http_script() {
        let request = request_with_options(Some(7), Some(b"iPXE"), false);
        let class = classify(&request);
        let reply = build_reply(&request, class, Ipv4Addr::new(10, 0, 0, 1), "10.0.0.1:8080").expect("build reply");

        let data = raw_option(&reply, 67).expect("option 67 present");
        assert!(String::from_utf8_lossy(data).ends_with("/api/v1/ipxe/boot.ipxe"));
        assert!(raw_option(&reply, 66).is_none());
    }

    #[test]
    fn encoded_reply_is_padded_to_300_bytes() {
        let request = request_with_options(Some(0), None, false);
        let class = classify(&request);
        let reply = build_reply(&request, class, Ipv4Addr::new(10, 0, 0, 1), "10.0.0.1:8080").expect("build reply");
        let encoded = encode_reply(&reply).expect("encode");
        assert!(encoded.len() >= 300);
    }
}
