//! Where received chat messages go.

use tokio::sync::mpsc;

use parley_core::ChatMessage;

/// Display collaborator for incoming chat. Called from receive loops, so
/// implementations must not block.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: &ChatMessage);
}

/// Prints `[<username> @<channel>]> <content>` to stdout.
pub struct StdoutSink;

impl MessageSink for StdoutSink {
    fn deliver(&self, message: &ChatMessage) {
        println!("\n{}", message.display_line());
    }
}

/// Forwards messages into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChatMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelSink {
    fn deliver(&self, message: &ChatMessage) {
        if self.tx.send(message.clone()).is_err() {
            tracing::trace!("sink receiver dropped");
        }
    }
}
