//! One-shot queries
//!
//! [`query`] runs a single prompt through a fresh session and yields the
//! session's events until the turn ends. Use [`ControlClient`] directly for
//! multi-turn conversations.

use futures::Stream;

use crate::client::ControlClient;
use crate::error::Result;
use crate::transport::Transport;
use crate::types::{ClientEvent, ClientOptions};

/// Send one prompt and stream the events of the turn
///
/// Yields events up to and including the `result` message, or up to the
/// terminal [`ClientEvent::Closed`] if the process exits first. The session
/// is closed when the stream ends. Connection and send errors are yielded as
/// the only item.
///
/// ```no_run
/// use agent_control_client::{ClientEvent, ClientOptions, Message, SpawnSpec, query};
/// use futures::StreamExt;
///
/// # async fn example() -> agent_control_client::Result<()> {
/// let options = ClientOptions::builder().spawn(SpawnSpec::new("claude")).build();
/// let stream = query("What is 2 + 2?", options);
/// let mut stream = Box::pin(stream);
///
/// while let Some(event) = stream.next().await {
///     if let ClientEvent::Message(Message::Assistant { message, .. }) = event? {
///         println!("{}", message.text());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn query(
    prompt: impl Into<String>,
    options: ClientOptions,
) -> impl Stream<Item = Result<ClientEvent>> {
    let prompt = prompt.into();
    async_stream::stream! {
        match ControlClient::connect(options).await {
            Ok(client) => {
                let mut events = run_turn(client, prompt);
                while let Some(item) = futures::StreamExt::next(&mut events).await {
                    yield item;
                }
            }
            Err(e) => yield Err(e),
        }
    }
}

/// [`query`] over a caller-supplied transport
pub fn query_with_transport(
    prompt: impl Into<String>,
    options: ClientOptions,
    transport: Box<dyn Transport>,
) -> impl Stream<Item = Result<ClientEvent>> {
    let prompt = prompt.into();
    async_stream::stream! {
        match ControlClient::connect_with_transport(options, transport).await {
            Ok(client) => {
                let mut events = run_turn(client, prompt);
                while let Some(item) = futures::StreamExt::next(&mut events).await {
                    yield item;
                }
            }
            Err(e) => yield Err(e),
        }
    }
}

fn run_turn(
    mut client: ControlClient,
    prompt: String,
) -> std::pin::Pin<Box<dyn Stream<Item = Result<ClientEvent>> + Send>> {
    Box::pin(async_stream::stream! {
        if let Err(e) = client.send_message(prompt).await {
            let _ = client.close().await;
            yield Err(e);
            return;
        }

        while let Some(event) = client.events().recv().await {
            let done = event.is_result() || event.is_closed();
            yield Ok(event);
            if done {
                break;
            }
        }

        if let Err(e) = client.close().await {
            tracing::debug!(error = %e, "Error closing query session");
        }
    })
}
