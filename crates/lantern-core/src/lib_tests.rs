#[cfg(test)]
mod tests {
    use crate::types::{Message, ModelStatus, Role};

    #[test]
    fn test_message_wire_format() {
        let msg = Message::user("Hello");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["text"], "Hello");
        assert_eq!(json["isUser"], true);
        assert_eq!(json["includeInContext"], true);
        assert!(json.get("remainTokens").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_legacy_record_defaults_to_included() {
        let json = serde_json::json!({
            "id": "1700000000000-abc",
            "text": "old",
            "isUser": false,
            "timestamp": "2024-01-01T00:00:00.000Z"
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert!(msg.include_in_context);
        assert_eq!(msg.role(), Role::Assistant);
    }

    #[test]
    fn test_null_include_flag_counts_as_included() {
        let json = serde_json::json!({
            "id": "1",
            "text": "old",
            "isUser": true,
            "timestamp": "2024-01-01T00:00:00Z",
            "includeInContext": null,
            "remainTokens": 42
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert!(msg.include_in_context);
        assert_eq!(msg.remain_tokens, Some(42));
    }

    #[test]
    fn test_excluded_flag_survives() {
        let mut msg = Message::assistant("pruned");
        msg.include_in_context = false;
        let back: Message = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert!(!back.include_in_context);
    }

    #[test]
    fn test_chat_message_conversion() {
        let chat = Message::assistant("Hi").to_chat_message();
        assert_eq!(chat.role, Role::Assistant);
        assert_eq!(chat.content, "Hi");
        assert_eq!(serde_json::to_value(&chat).unwrap()["role"], "assistant");
    }

    #[test]
    fn test_default_status() {
        assert_eq!(ModelStatus::default(), ModelStatus::NotSetup);
        assert!(!ModelStatus::Preparing.is_ready());
    }
}
