//! Plain-text export of a conversation

use parley_core::Conversation;

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub file_name: String,
    pub body: String,
}

/// `# title`, then one `You: …` / `AI: …` block per message, blocks
/// separated by a blank line
pub fn render(conversation: &Conversation) -> Transcript {
    let title = match conversation.title.trim() {
        "" => "conversation",
        t => t,
    };

    let mut blocks = Vec::with_capacity(conversation.messages.len() + 1);
    blocks.push(format!("# {}", title));
    for message in &conversation.messages {
        blocks.push(format!(
            "{}: {}",
            message.speaker(),
            message.content.to_plain_text()
        ));
    }

    Transcript {
        file_name: format!("{}.txt", file_stem(title)),
        body: blocks.join("\n\n") + "\n",
    }
}

/// Whitespace runs collapsed to `_`
fn file_stem(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join("_")
}
