use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "ws-dispatch-cli")]
#[command(about = "Send one envelope to a ws-dispatch server and print the replies", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "ws://localhost:8000/ws")]
    url: String,

    /// Value of the envelope's `type` field
    #[arg(short = 't', long = "type")]
    kind: String,

    /// JSON value for the envelope's `data` field
    #[arg(short, long)]
    data: Option<String>,

    /// Number of replies to wait for
    #[arg(short, long, default_value_t = 1)]
    replies: usize,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut envelope = json!({ "type": cli.kind });
    if let Some(raw) = &cli.data {
        let data: Value = serde_json::from_str(raw)?;
        envelope["data"] = data;
    }

    let (mut socket, _) = connect_async(cli.url.as_str()).await?;
    socket.send(Message::text(envelope.to_string())).await?;

    let wait = Duration::from_secs(cli.timeout);
    let mut received = 0;
    while received < cli.replies {
        match tokio::time::timeout(wait, socket.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                print_reply(text.as_str());
                received += 1;
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                eprintln!("Error: server closed the connection");
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => return Err(e.into()),
            Err(_) => {
                eprintln!("Error: no reply within {}s", cli.timeout);
                break;
            }
        }
    }

    let _ = socket.close(None).await;
    Ok(())
}

fn print_reply(text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", text),
        },
        Err(_) => println!("{}", text),
    }
}
