//! plugbrowser-renderer — the plug process.
//!
//! Reads its startup payload as the first line on stdin, then serves view
//! commands from stdin and writes view events to stdout until its last view
//! is closed or the UI goes away.

use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncWrite, BufReader};

use plugbrowser::services::message_channel::{MessageReader, MessageWriter};
use plugbrowser::services::render_engine::HeadlessFactory;
use plugbrowser::services::renderer::RendererProcess;
use plugbrowser::types::errors::ChannelError;
use plugbrowser::types::protocol::{Command, Envelope, InitPayload};

#[derive(Parser)]
#[command(name = "plugbrowser-renderer")]
#[command(version, about = "Renderer process of plugbrowser", long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 1)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    plugbrowser::init_logging(args.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Can't start the event loop: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve()) {
        Ok(()) => ExitCode::SUCCESS,
        // The UI is gone; there is nobody left to report to.
        Err(ChannelError::BrokenChannel) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> Result<(), ChannelError> {
    let mut reader = MessageReader::new(BufReader::new(tokio::io::stdin()));
    let mut writer = MessageWriter::new(tokio::io::stdout());

    let init: InitPayload = reader.recv_lenient().await?;
    let pid = std::process::id();
    info!("Renderer {} starting with {}", pid, init.uri);
    let mut renderer = RendererProcess::new(init, HeadlessFactory, pid);
    flush(&mut renderer, &mut writer).await?;

    while !renderer.is_finished() {
        match reader.recv::<Envelope<Command>>().await {
            Ok(Some(envelope)) => {
                renderer.handle_command(envelope.channel, envelope.message);
                flush(&mut renderer, &mut writer).await?;
            }
            Ok(None) => {
                info!("Renderer {}: UI closed the channel", pid);
                break;
            }
            Err(ChannelError::Decode(msg)) => warn!("Dropping undecodable command: {}", msg),
            Err(e) => return Err(e),
        }
    }
    info!("Renderer {} done", pid);
    Ok(())
}

async fn flush<W>(
    renderer: &mut RendererProcess<HeadlessFactory>,
    writer: &mut MessageWriter<W>,
) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    for envelope in renderer.drain_outbox() {
        writer.send(&envelope).await?;
    }
    Ok(())
}

