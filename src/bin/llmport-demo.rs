use std::io::Write;
use std::time::Instant;
use futures_util::StreamExt;
use log::{error, info};
use llmport::config::CONFIG_ENV;
use llmport::providers::ReferenceCompletion;
use llmport::{
  BackendRegistry
, CancellationToken
, GenerationRequestSettings
, LlmportConfig
, TextCompletion
};

const PROMPT: &str = "Write one paragraph why AI is awesome";

#[tokio::main]
async fn main()
{   env_logger::init();
    if let Err(e) = run().await
    {   error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> llmport::Result<()>
{   let settings = GenerationRequestSettings::builder()
      .max_output_units(100)
      .temperature(1.0)
      .nucleus_probability(0.5)
      .frequency_penalty(0.0)
      .presence_penalty(0.0)
      .build()?;
    let reference = ReferenceCompletion::default();

    println!("======== Reference backend - streaming ========");
    stream_to_stdout(&reference, &settings).await?;

    println!("======== Reference backend - blocking ========");
    let text = reference
      .complete(PROMPT, &settings, &CancellationToken::new())
      .await?;
    println!("{}", text);

    println!("======== Reference backend - cancelled up front ========");
    let cancel = CancellationToken::new();
    cancel.cancel();
    match reference
      .complete_stream(PROMPT, &settings, &cancel)
      .collect_text()
      .await
    {   Err(failure) => println!("{}", failure)
      , Ok(text) => println!("Unexpected output: {}", text)
    }

    if std::env::var(CONFIG_ENV).is_ok()
    {   let config = LlmportConfig::from_env()?;
        let registry = BackendRegistry::from_config(&config)?;
        let backend = registry.default_backend()?;
        println!(
          "======== {} - streaming ========",
          registry.default_name().unwrap_or("default")
        );
        stream_to_stdout(backend.as_ref(), &config.settings()?).await?;
    }
    Ok(())
}

/// Print chunks as they arrive; Ctrl-C cancels the call
async fn stream_to_stdout(
  backend: &dyn TextCompletion
, settings: &GenerationRequestSettings
) -> llmport::Result<()>
{   let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok()
      {   on_interrupt.cancel();
      }
    });

    println!("Prompt: {}", PROMPT);
    let started = Instant::now();
    let mut stream = backend.complete_stream(PROMPT, settings, &cancel);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await
    {   match chunk
        {   Ok(chunk) => {
              print!("{}", chunk);
              let _ = stdout.flush();
            }
          , Err(failure) if failure.error.is_cancelled() => {
              watcher.abort();
              println!();
              info!("Interrupted after {} chunks", failure.delivered);
              return Ok(());
            }
          , Err(failure) => {
              watcher.abort();
              println!();
              return Err(failure.into());
            }
        }
    }
    println!();
    watcher.abort();
    info!(
      "Streamed {} chunks in {:?}",
      stream.delivered(), started.elapsed()
    );
    Ok(())
}
