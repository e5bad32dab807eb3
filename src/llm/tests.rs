use super::*;

#[test]
fn roles_serialize_lowercase() {
    let message = ChatMessage::assistant("hello");
    let json = serde_json::to_string(&message).expect("should serialize");
    assert_eq!(json, r#"{"role":"assistant","content":"hello"}"#);

    let parsed: ChatMessage =
        serde_json::from_str(r#"{"role":"system","content":"rules"}"#).expect("should parse");
    assert_eq!(parsed, ChatMessage::system("rules"));
    assert_eq!(Role::User.to_string(), "user");
}

#[test]
fn default_chat_options() {
    let config = LanguageModelConfig::default();
    assert_eq!(
        config.chat_options(),
        GenerationOptions {
            temperature: 0.6,
            max_tokens: 2048
        }
    );
}
