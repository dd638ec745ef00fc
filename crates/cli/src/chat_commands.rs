use std::{io::Write, sync::Arc, time::Duration};

use {
    anyhow::Result,
    kestrel_agents::{
        ChatSession, LlmProvider, RunnerError, RunnerEvent, TurnResult,
        prompt::build_system_prompt, providers::OllamaProvider,
    },
    kestrel_config::KestrelConfig,
    kestrel_tools::Dispatcher,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, BufReader},
        sync::mpsc,
    },
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

/// What a line typed at the prompt asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Exit,
    Skip,
    Message(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Skip,
        "exit" | "quit" => Input::Exit,
        text => Input::Message(text),
    }
}

/// Why the REPL stopped.
#[derive(Debug, PartialEq, Eq)]
enum ReplExit {
    Quit,
    EndOfInput,
    /// Ctrl-C at an idle prompt.
    Interrupted,
}

fn print_event(event: RunnerEvent) {
    match event {
        RunnerEvent::ToolCallStart { name, .. } => eprintln!("  ⚙ {name}…"),
        RunnerEvent::ToolCallEnd { name, success, .. } => {
            let mark = if success { "✓" } else { "✗" };
            eprintln!("  {mark} {name}");
        },
        RunnerEvent::Iteration(n) => debug!(iteration = n, "model query"),
        RunnerEvent::Thinking | RunnerEvent::ThinkingDone => {},
    }
}

fn prompt() {
    print!("\nyou › ");
    std::io::stdout().flush().ok();
}

fn report(outcome: Result<TurnResult, RunnerError>) {
    match outcome {
        Ok(turn) => {
            println!("\nkestrel › {}", turn.text);
            if turn.exhausted {
                eprintln!("  (tool round limit reached)");
            }
        },
        Err(RunnerError::Cancelled) => eprintln!("\n  (cancelled)"),
        Err(e) => eprintln!("\n  error: {e}"),
    }
}

/// One turn per line. An interrupt cancels the turn in flight, or ends the
/// loop when no turn is running.
async fn repl<R>(
    session: &mut ChatSession,
    input: R,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> Result<ReplExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(()) = interrupts.recv() => return Ok(ReplExit::Interrupted),
        };
        let Some(line) = line else {
            return Ok(ReplExit::EndOfInput);
        };
        let text = match classify(&line) {
            Input::Exit => return Ok(ReplExit::Quit),
            Input::Skip => continue,
            Input::Message(text) => text,
        };

        let cancel = CancellationToken::new();
        let turn = session.run_turn(text, &cancel);
        tokio::pin!(turn);
        let outcome = tokio::select! {
            outcome = &mut turn => outcome,
            Some(()) = interrupts.recv() => {
                cancel.cancel();
                turn.await
            },
        };
        report(outcome);
    }
}

/// Interactive loop until `exit`, `quit`, EOF or Ctrl-C at the prompt.
/// Ctrl-C during a turn cancels that turn and returns to the prompt.
pub async fn run_chat(config: &KestrelConfig) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::from_config(config)?);
    let system_prompt = config
        .agent
        .system_prompt
        .clone()
        .unwrap_or_else(|| build_system_prompt(dispatcher.registry()));
    let provider = Arc::new(OllamaProvider::new(
        &config.model.host,
        &config.model.model,
        Duration::from_secs(config.model.timeout_secs),
    )?);

    println!(
        "kestrel chat ({} via {} at {}). Type 'exit' to leave, Ctrl-C cancels a running turn.",
        provider.id(),
        provider.name(),
        config.model.host
    );

    let mut session = ChatSession::new(provider, dispatcher, &system_prompt)
        .with_events(Box::new(print_event));

    let (interrupt_tx, mut interrupts) = mpsc::unbounded_channel();
    let listener = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let exit = repl(
        &mut session,
        BufReader::new(tokio::io::stdin()),
        &mut interrupts,
    )
    .await;
    listener.abort();

    debug!(?exit, "chat ended");
    if matches!(exit, Ok(ReplExit::Interrupted)) {
        println!();
    }
    exit.map(|_| ())
}
