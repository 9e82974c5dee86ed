use super::types::{now_micros, Message, MessageKind, ReplicationMode};

#[test]
fn test_roundtrip_full_envelope() {
    let msg = Message {
        kind: MessageKind::WriteRequest,
        sender: 1,
        receiver: 3,
        key: "user:42".to_string(),
        value: "hello world".to_string(),
        success: true,
        timestamp: 1234567890,
        sequence: 17,
        correlation: "abc-123".to_string(),
        targets: vec![1, 2, 3],
        metadata: "m".to_string(),
    };

    let decoded = Message::deserialize(&msg.serialize()).unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn test_roundtrip_empty_fields() {
    let msg = Message {
        kind: MessageKind::Heartbeat,
        sender: 7,
        ..Message::default()
    };
    assert!(msg.key.is_empty());
    assert!(msg.targets.is_empty());

    let decoded = Message::deserialize(&msg.serialize()).unwrap();
    assert_eq!(decoded, msg);
    assert!(decoded.targets.is_empty());
    assert_eq!(decoded.value, "");
}

#[test]
fn test_roundtrip_every_kind() {
    for raw in 0u8..=19 {
        let kind = MessageKind::from_u8(raw).expect("contiguous kinds");
        let msg = Message {
            kind,
            sender: 2,
            sequence: raw as u32,
            ..Message::default()
        };
        let decoded = Message::deserialize(&msg.serialize()).unwrap();
        assert_eq!(decoded.kind, kind);
    }
}

#[test]
fn test_deserialize_rejects_garbage() {
    assert!(Message::deserialize("").is_err());
    assert!(Message::deserialize("not a message").is_err());
    // Too few fields.
    assert!(Message::deserialize("0|1|2|k|v|1|0|0|c").is_err());
    // Unknown kind value.
    assert!(Message::deserialize("99|1|2|k|v|1|0|0|c||").is_err());
    // Non-numeric sender.
    assert!(Message::deserialize("0|x|2|k|v|1|0|0|c||").is_err());
    // Malformed targets list.
    assert!(Message::deserialize("0|1|2|k|v|1|0|0|c|1,x,3|").is_err());
}

#[test]
fn test_response_correlates_with_request() {
    let request = Message::request(MessageKind::ReadRequest, 4, "k", "");
    let response = Message::respond(&request, MessageKind::ReadResponse, 9);

    assert_eq!(response.receiver, 4);
    assert_eq!(response.sequence, request.sequence);
    assert_eq!(response.correlation, request.correlation);
    assert_eq!(response.key, "k");
}

#[test]
fn test_mode_and_kind_helpers() {
    assert!(MessageKind::ReadRequest.is_read());
    assert!(MessageKind::WriteRequest.is_write());
    assert!(!MessageKind::ChainForward.is_read());

    assert_eq!(ReplicationMode::from_u8(0), Some(ReplicationMode::ChainOnly));
    assert_eq!(ReplicationMode::from_u8(2), Some(ReplicationMode::Hybrid));
    assert_eq!(ReplicationMode::from_u8(9), None);
    assert_eq!(ReplicationMode::QuorumOnly.to_string(), "quorum");
}

#[test]
fn test_now_micros_is_monotone_enough() {
    let a = now_micros();
    let b = now_micros();
    assert!(b >= a);
}
