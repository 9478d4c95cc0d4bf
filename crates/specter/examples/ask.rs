//! Ask a short question against a local Ollama server, streaming the
//! cumulative answer to stdout.
//!
//! ```sh
//! cargo run -p specter --example ask -- "what is a borrow checker?"
//! ```

use specter::core::{CancelToken, StreamingCallbacks};
use specter::Specter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "what is a borrow checker?".to_string());

    let specter = Specter::from_env();
    specter.register_configured_models().await;

    specter
        .register_session(
            "ask",
            StreamingCallbacks::new()
                .on_chunk(|partial| eprint!("\r{partial}"))
                .on_complete(|_| eprintln!()),
        )
        .await?;

    let cancel = CancelToken::new();
    let answer = specter
        .ask_question(&question, None, Some("ask"), &cancel)
        .await?;

    println!("{}", answer.text);
    println!(
        "[{} in {}ms, cached: {}]",
        answer.metadata.model, answer.metadata.processing_time_ms, answer.metadata.cached
    );
    Ok(())
}
