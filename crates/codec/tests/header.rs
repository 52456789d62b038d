use anyhow::Result;
use ipc_router_codec::{Error, Flag, Header, Kind};

#[test]
fn round_trip_with_and_without_address() -> Result<()> {
    {
        let mut header = Header::new(Kind::Ping, "no address".into());
        header.service = 42;
        header.set_flag(Flag::Query);

        let decoded = Header::unmarshal(&header.marshal())?;
        assert_eq!(decoded, header);
        assert!(decoded.is_query());
    }

    {
        let mut header = Header::new(Kind::SessionData, "v6".into());
        header.addr = Some("[2001:db8::1]:9000".parse()?);

        let decoded = Header::unmarshal(&header.marshal())?;
        assert_eq!(decoded.addr, header.addr);
        assert_eq!(decoded.body, header.body);
    }

    Ok(())
}

#[test]
fn truncated_and_corrupt_packets_are_rejected() {
    // Shorter than the fixed fields.
    assert_eq!(Header::unmarshal(&[0u8; 16]), Err(Error::PacketTooShort));

    // An unknown address tag.
    let mut bytes = Header::new(Kind::Test, "x".into()).marshal().to_vec();
    bytes[16] = 9;
    assert_eq!(Header::unmarshal(&bytes), Err(Error::InvalidAddress));

    // An address tag with the address cut off.
    let mut header = Header::new(Kind::Test, "".into());
    header.addr = Some("127.0.0.1:5000".parse().unwrap());
    let bytes = header.marshal();
    assert_eq!(
        Header::unmarshal(&bytes[..bytes.len() - 3]),
        Err(Error::PacketTooShort)
    );
}

#[test]
fn reply_keeps_id_and_kind_only() {
    let mut query = Header::new(Kind::GetPort, "files".into());
    query.service = 7;
    query.set_flag(Flag::Query);
    query.set_flag(Flag::FromNet);
    query.addr = Some("10.1.1.1:2000".parse().unwrap());

    let reply = query.reply("4242".into());
    assert_eq!(reply.id, query.id);
    assert_eq!(reply.kind, query.kind);
    assert_eq!(reply.service, 0);
    assert_eq!(reply.addr, None);
    assert!(reply.is_response());
    assert!(!reply.is_query());
    assert!(!reply.is_from_net());
}

#[test]
fn kind_checks_and_body_accessors() {
    let mut header = Header::new(Kind::Test, "hello".into());

    assert!(header.expect_kind(Kind::Test).is_ok());
    assert_eq!(header.expect_kind(Kind::Ping), Err(Error::KindDoesNotMatch));

    assert_eq!(header.body_str(), "hello");
    header.set_body(&b"\xffraw"[..]);
    assert_eq!(header.body_str(), "\u{fffd}raw");
}
