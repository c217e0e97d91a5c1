use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::Message;

const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<StoredMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            title: self.title.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Chat history, one JSON file per conversation under `<base_dir>/conversations`.
pub struct ConversationStore {
    dir: PathBuf,
    conversations: Mutex<HashMap<Uuid, Conversation>>,
}

impl ConversationStore {
    pub fn open(base_dir: &std::path::Path) -> Result<Self> {
        let dir = base_dir.join("conversations");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut conversations = HashMap::new();
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let content = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<Conversation>(&content) {
                    Ok(conv) => {
                        conversations.insert(conv.id, conv);
                    }
                    Err(e) => tracing::warn!("Skipping unreadable conversation {}: {e}", path.display()),
                }
            }
        }
        tracing::debug!("Loaded {} conversations", conversations.len());

        Ok(Self {
            dir,
            conversations: Mutex::new(conversations),
        })
    }

    pub fn get(&self, id: Uuid) -> Option<Conversation> {
        self.lock().get(&id).cloned()
    }

    /// Newest first.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let mut list: Vec<_> = self.lock().values().map(Conversation::summary).collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    /// Append an exchange to `id`, or start a new conversation when `id` is
    /// `None` or unknown. Returns the conversation id.
    pub fn record_exchange(&self, id: Option<Uuid>, user: &Message, reply: &Message) -> Result<Uuid> {
        let now = Utc::now();
        let mut conversations = self.lock();
        let mut conv = match id.and_then(|id| conversations.get(&id)) {
            Some(existing) => existing.clone(),
            None => Conversation {
                id: Uuid::new_v4(),
                title: title_from(&user.content),
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        };
        for msg in [user, reply] {
            conv.messages.push(StoredMessage {
                role: msg.role.clone(),
                content: msg.content.clone(),
                created_at: now,
            });
        }
        conv.updated_at = now;
        // Memory only changes once the file is written.
        self.save_to_disk(&conv)?;
        let id = conv.id;
        conversations.insert(id, conv);
        Ok(id)
    }

    fn save_to_disk(&self, conv: &Conversation) -> Result<()> {
        let path = self.dir.join(format!("{}.json", conv.id));
        let tmp = self.dir.join(format!("{}.json.tmp", conv.id));

        let json = serde_json::to_string_pretty(conv)?;
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write conversation: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Conversation>> {
        self.conversations.lock().expect("conversation lock poisoned")
    }
}

fn title_from(text: &str) -> String {
    let title: String = text.trim().chars().take(TITLE_MAX_CHARS).collect();
    if title.is_empty() {
        "New Chat".to_string()
    } else {
        title
    }
}
