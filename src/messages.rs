use teloxide::utils::markdown::{escape, italic, user_mention};

use crate::spybot::{ChatInfo, Sender};

pub fn registered() -> &'static str {
    "Yeess, Master? Add me to the groups you want me to spy on, \
    and I shall let you know their plans at once!"
}

pub fn help() -> &'static str {
    HELP_MESSAGE
}

pub fn spying() -> &'static str {
    "As you wish, Master! I will spy on this group for you!"
}

pub fn dismissed() -> &'static str {
    "As you wish, Master! I will leave this group immediately!"
}

pub fn reporting_here() -> &'static str {
    "Sure, Master, I will report my findings here."
}

/// The attributed copy of `text` that is sent to every subscriber.
pub fn forwarded(chat: &ChatInfo, sender: &Sender, text: &str) -> String {
    let chat_ref = match &chat.username {
        Some(username) => escape(&format!("@{username}")),
        None => italic(&escape(chat.title.as_deref().unwrap_or("Untitled"))),
    };

    format!(
        "{} @ {}:\n{}",
        user_mention(sender.id, &escape(&sender.name)),
        chat_ref,
        escape(text)
    )
}

const HELP_MESSAGE: &str = "Greetings, Master! I am SpyBot. I can help you to track what people are \
talking about in all groups where I am a member. Here is how to control me:

 • Whenever you add me to a chat or group, I will automatically start spying on it.
 • You can use a /spy command in a chat to explicitly order me to start watching this chat or group.
 • Use a /dismiss command in a chat to order me to stop watching this group or chat.
 • If you want to change the destination where my reports are getting sent, \
issue a /report_here command in the new destination chat.

Easy, isn't it? Try it now. I'm awaiting your orders.";

#[cfg(test)]
mod tests {
    use teloxide::types::{ChatId, UserId};

    use super::*;

    fn sender() -> Sender {
        Sender {
            id: UserId(2),
            name: "Bob Builder".to_string(),
        }
    }

    #[test]
    fn forward_prefers_public_handle() {
        let chat = ChatInfo {
            id: ChatId(200),
            title: Some("Friends".to_string()),
            username: Some("friends".to_string()),
            message_id: None,
        };

        let msg = forwarded(&chat, &sender(), "hello");
        assert_eq!(msg, "[Bob Builder](tg://user?id=2) @ @friends:\nhello");
    }

    #[test]
    fn forward_falls_back_to_italic_title() {
        let chat = ChatInfo {
            id: ChatId(200),
            title: Some("Friends".to_string()),
            username: None,
            message_id: None,
        };
        let msg = forwarded(&chat, &sender(), "see you at 5.30!");
        assert!(msg.contains("@ _Friends_:"));
        assert!(msg.ends_with("see you at 5\\.30\\!"));

        let untitled = ChatInfo { title: None, ..chat };
        assert!(forwarded(&untitled, &sender(), "hi").contains("_Untitled_"));
    }

    #[test]
    fn help_lists_commands() {
        let text = help();
        for cmd in ["/spy", "/dismiss", "/report_here"] {
            assert!(text.contains(cmd), "missing {cmd}");
        }
    }
}
