//! 终端输入解析和事件输出

use nearshare_core::{FileKind, PeerDevice, ReceivedMessage, TransferEvent};
use std::path::PathBuf;

/// 一行用户输入
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    /// 普通文本，作为 TEXT 发送
    Text(String),
    /// `/image` `/video` `/doc <path>`
    SendFile(FileKind, PathBuf),
    /// `/connect <n>`（从 1 开始的序号）
    Connect(usize),
    Retry,
    Cancel,
    Peers,
    Help,
    Quit,
    Empty,
    /// 无法识别的命令及原因
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "image" | "video" | "doc" => {
            if arg.is_empty() {
                return Input::Invalid(format!("usage: /{} <path>", name));
            }
            match name.parse::<FileKind>() {
                Ok(kind) => Input::SendFile(kind, PathBuf::from(arg)),
                Err(e) => Input::Invalid(e),
            }
        }
        "connect" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => Input::Connect(n),
            _ => Input::Invalid("usage: /connect <n>".to_string()),
        },
        "retry" => Input::Retry,
        "cancel" => Input::Cancel,
        "peers" => Input::Peers,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("unknown command /{}", other)),
    }
}

pub const HELP: &str = "\
Commands:
  <text>            send a text message
  /image <path>     send an image
  /video <path>     send a video
  /doc <path>       send a document
  /peers            list discovered devices
  /connect <n>      connect to device n
  /retry            retry the last connection
  /cancel           cancel the current selection
  /quit             exit";

pub fn render_peers(peers: &[PeerDevice]) -> String {
    if peers.is_empty() {
        return "  (no devices)".to_string();
    }
    peers
        .iter()
        .enumerate()
        .map(|(i, peer)| {
            format!(
                "  [{}] {} ({}) - {}",
                i + 1,
                peer.display_name,
                peer.address,
                peer.status
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 人类可读的事件描述
pub fn render_event(event: &TransferEvent) -> String {
    match event {
        TransferEvent::PeerListUpdated { peers } => {
            format!("📡 Devices:\n{}", render_peers(peers))
        }
        TransferEvent::Connected { role, address } => {
            format!("🔗 Connected as {} ({})", role, address)
        }
        TransferEvent::Disconnected => "🔌 Disconnected".to_string(),
        TransferEvent::MessageReceived { message } => match message {
            ReceivedMessage::Text { text } => format!("💬 {}", text),
            ReceivedMessage::File {
                file_kind,
                path,
                size,
            } => format!("📥 Received {} ({} bytes): {}", file_kind, size, path.display()),
            ReceivedMessage::PeerName { name } => format!("👋 Peer is {}", name),
        },
        TransferEvent::Error { reason } => format!("❌ {}", reason),
        TransferEvent::Status { text } => format!("ℹ️  {}", text),
    }
}

/// 每个事件一行 JSON
pub fn event_json(event: &TransferEvent) -> anyhow::Result<String> {
    Ok(serde_json::to_string(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearshare_core::PeerStatus;

    #[test]
    fn test_parse_text_and_commands() {
        assert_eq!(parse_input("  hello there "), Input::Text("hello there".to_string()));
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input("/connect 2"), Input::Connect(2));
        assert_eq!(parse_input("/retry"), Input::Retry);
        assert_eq!(parse_input("/cancel"), Input::Cancel);
        assert_eq!(parse_input("/quit"), Input::Quit);
    }

    #[test]
    fn test_parse_file_commands() {
        assert_eq!(
            parse_input("/image /tmp/cat photo.jpg"),
            Input::SendFile(FileKind::Image, PathBuf::from("/tmp/cat photo.jpg"))
        );
        assert_eq!(
            parse_input("/doc notes.pdf"),
            Input::SendFile(FileKind::Doc, PathBuf::from("notes.pdf"))
        );
        assert!(matches!(parse_input("/video"), Input::Invalid(_)));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(parse_input("/connect 0"), Input::Invalid(_)));
        assert!(matches!(parse_input("/connect x"), Input::Invalid(_)));
        assert!(matches!(parse_input("/dance"), Input::Invalid(_)));
    }

    #[test]
    fn test_render_peers_numbering() {
        let peers = vec![
            PeerDevice::new("aa", "Pixel", PeerStatus::Available),
            PeerDevice::new("bb", "Galaxy", PeerStatus::Invited),
        ];
        let text = render_peers(&peers);
        assert!(text.contains("[1] Pixel (aa) - Available"));
        assert!(text.contains("[2] Galaxy (bb) - Invited"));
    }

    #[test]
    fn test_event_json_shape() {
        let json = event_json(&TransferEvent::MessageReceived {
            message: ReceivedMessage::Text {
                text: "hi".to_string(),
            },
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "messageReceived");
        assert_eq!(value["message"]["kind"], "text");
        assert_eq!(value["message"]["text"], "hi");
    }
}
