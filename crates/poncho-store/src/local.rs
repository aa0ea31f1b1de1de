// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Local file-backed conversation store: bit-stable on-disk layout under a
//! per-agent directory, `index.json` plus one body file per conversation.
//! Read-modify-write cycles take an `fs4` advisory lock on the index file so
//! two processes sharing a store root don't interleave writes.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use fs4::fs_std::FileExt as _;

use crate::store::{ConversationStore, RunStore, StoreError, StoreResult};
use crate::types::{Conversation, ConversationIndex, RunState};

pub struct LocalConversationStore {
    dir: PathBuf,
}

impl LocalConversationStore {
    /// `dir` is the agent's `conversations` directory
    /// (`<storeRoot>/<slug(name)>--<slug(id)>/conversations`).
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn body_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Locks `index.json` (creating it if absent) for the duration of `f`,
    /// then persists whatever `f` left in the returned index.
    fn with_locked_index<T>(
        &self,
        f: impl FnOnce(&mut ConversationIndex) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let path = self.index_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        file.lock_exclusive().map_err(|e| StoreError::Io(e.to_string()))?;

        let result = (|| {
            let mut index = read_index(&path)?;
            let out = f(&mut index)?;
            write_index(&path, &index)?;
            Ok(out)
        })();

        let _ = file.unlock();
        result
    }
}

fn read_index(path: &Path) -> StoreResult<ConversationIndex> {
    if !path.exists() {
        return Ok(ConversationIndex::default());
    }
    let mut buf = String::new();
    File::open(path)
        .and_then(|mut f| f.read_to_string(&mut buf))
        .map_err(|e| StoreError::Io(e.to_string()))?;
    if buf.trim().is_empty() {
        return Ok(ConversationIndex::default());
    }
    serde_json::from_str(&buf).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn write_index(path: &Path, index: &ConversationIndex) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(index).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| StoreError::Io(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))
}

fn read_body(path: &Path) -> StoreResult<Conversation> {
    let buf = fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
    serde_json::from_str(&buf).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn write_body(path: &Path, conversation: &Conversation) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(conversation).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| StoreError::Io(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))
}

#[async_trait]
impl ConversationStore for LocalConversationStore {
    async fn list(&self, owner_id: &str) -> StoreResult<Vec<crate::types::ConversationSummary>> {
        let owner_id = owner_id.to_string();
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let store = LocalConversationStore { dir };
            let index = read_index(&store.index_path())?;
            let mut out: Vec<_> = index.conversations.into_iter().filter(|c| c.owner_id == owner_id).collect();
            out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn get(&self, id: &str) -> StoreResult<Conversation> {
        let path = self.body_path(id);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Err(StoreError::NotFound(id));
            }
            read_body(&path)
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn create(&self, owner_id: &str, title: Option<String>) -> StoreResult<Conversation> {
        let owner_id = owner_id.to_string();
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let store = LocalConversationStore { dir };
            let conversation = Conversation::new(owner_id, title);
            write_body(&store.body_path(&conversation.id), &conversation)?;
            store.with_locked_index(|index| {
                index.conversations.push(conversation.summary());
                Ok(())
            })?;
            Ok(conversation)
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn update(&self, mut conversation: Conversation) -> StoreResult<()> {
        conversation.updated_at = Utc::now();
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let store = LocalConversationStore { dir };
            write_body(&store.body_path(&conversation.id), &conversation)?;
            store.with_locked_index(|index| {
                if let Some(entry) = index.conversations.iter_mut().find(|c| c.id == conversation.id) {
                    *entry = conversation.summary();
                } else {
                    index.conversations.push(conversation.summary());
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let store = LocalConversationStore { dir };
            let _ = fs::remove_file(store.body_path(&id));
            store.with_locked_index(|index| {
                index.conversations.retain(|c| c.id != id);
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }
}

/// TTL-bounded run-state file store, one JSON file per run under `dir`.
/// `ttl` entries older than this are treated as absent by `get` and pruned
/// lazily rather than by a background sweep.
pub struct LocalRunStore {
    dir: PathBuf,
    ttl: chrono::Duration,
}

impl LocalRunStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: chrono::Duration) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { dir, ttl })
    }

    fn path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl RunStore for LocalRunStore {
    async fn get(&self, run_id: &str) -> StoreResult<Option<RunState>> {
        let path = self.path(run_id);
        let ttl = self.ttl;
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            let buf = fs::read_to_string(&path).map_err(|e| StoreError::Io(e.to_string()))?;
            let state: RunState = serde_json::from_str(&buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
            if Utc::now() - state.updated_at > ttl {
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
            Ok(Some(state))
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn set(&self, mut state: RunState) -> StoreResult<()> {
        state.updated_at = Utc::now();
        let path = self.path(&state.run_id);
        tokio::task::spawn_blocking(move || {
            let json = serde_json::to_string_pretty(&state).map_err(|e| StoreError::Serialization(e.to_string()))?;
            fs::write(&path, json).map_err(|e| StoreError::Io(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn delete(&self, run_id: &str) -> StoreResult<()> {
        let path = self.path(run_id);
        tokio::task::spawn_blocking(move || {
            let _ = fs::remove_file(&path);
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }
}
