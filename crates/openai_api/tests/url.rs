use openai_api::normalize_chat_url;

#[test]
fn url_normalization_keeps_existing_completions_endpoint() {
    assert_eq!(
        normalize_chat_url("https://api.openai.com/v1/chat/completions"),
        "https://api.openai.com/v1/chat/completions"
    );
}

#[test]
fn url_normalization_appends_completions_to_chat_base() {
    assert_eq!(
        normalize_chat_url("https://openrouter.ai/api/v1/chat/"),
        "https://openrouter.ai/api/v1/chat/completions"
    );
}

#[test]
fn url_normalization_appends_chat_completions_to_generic_base() {
    assert_eq!(
        normalize_chat_url("http://127.0.0.1:8080/v1"),
        "http://127.0.0.1:8080/v1/chat/completions"
    );
    assert_eq!(normalize_chat_url("  "), "https://api.openai.com/v1/chat/completions");
}
