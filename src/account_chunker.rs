//! Account record chunking.
//!
//! Turns a CRM account record into prioritized chunks, one group of
//! chunks per section, processed in priority order: summary first,
//! then opportunities, technologies, contacts (in fixed-size groups),
//! and notes last. Every chunk is prefixed with a deterministic context
//! line so it stays self-describing when embedded on its own.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use tracing::debug;

use crate::models::{
    AccountChunkType, AccountInfo, AccountRecord, Chunk, ChunkError, ChunkKind, Contact, Priority,
    TextChunk,
};
use crate::splitter::{count_tokens, sentence_spans, SplitOptions, TextSplitter};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountChunkOptions {
    pub split: SplitOptions,
    /// Contacts per contact-group chunk.
    pub max_contacts_per_chunk: usize,
}

impl Default for AccountChunkOptions {
    fn default() -> Self {
        Self {
            split: SplitOptions::default(),
            max_contacts_per_chunk: 5,
        }
    }
}

#[derive(Debug, Default)]
pub struct AccountChunkResult {
    pub chunks: Vec<Chunk>,
    pub chunk_type_counts: BTreeMap<String, usize>,
    pub errors: Vec<ChunkError>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AccountChunker {
    splitter: TextSplitter,
}

impl AccountChunker {
    pub fn new() -> Self {
        Self {
            splitter: TextSplitter::new(),
        }
    }

    /// Chunk one account record. An account with no populated sections
    /// yields zero chunks and no errors.
    pub fn chunk_account(
        &self,
        account: &AccountRecord,
        opts: &AccountChunkOptions,
    ) -> AccountChunkResult {
        let mut result = AccountChunkResult::default();
        let context = context_prefix(account);

        if let Some(summary) = &account.summary {
            if !summary.trim().is_empty() {
                self.push_section(
                    &mut result,
                    account,
                    &context,
                    AccountChunkType::Summary,
                    Priority::High,
                    summary.clone(),
                    BTreeSet::new(),
                    &opts.split,
                );
            }
        }

        if !account.opportunities.is_empty() {
            let body = account
                .opportunities
                .iter()
                .map(|o| {
                    let mut line = format!("Opportunity: {}", o.name);
                    if let Some(stage) = &o.stage {
                        line.push_str(&format!(" | Stage: {}", stage));
                    }
                    if let Some(value) = o.value {
                        line.push_str(&format!(" | Value: ${:.0}", value));
                    }
                    if let Some(close) = &o.close_date {
                        line.push_str(&format!(" | Close: {}", close));
                    }
                    if let Some(desc) = &o.description {
                        line.push_str(&format!("\n{}", desc));
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            self.push_section(
                &mut result,
                account,
                &context,
                AccountChunkType::Opportunities,
                Priority::High,
                body,
                BTreeSet::new(),
                &opts.split,
            );
        }

        if !account.technologies.is_empty() {
            let mut keys = BTreeSet::new();
            let body = account
                .technologies
                .iter()
                .map(|t| {
                    keys.insert(t.name.to_lowercase());
                    let mut line = format!("Technology: {}", t.name);
                    if let Some(category) = &t.category {
                        line.push_str(&format!(" ({})", category));
                    }
                    if let Some(status) = &t.status {
                        line.push_str(&format!(" | Status: {}", status));
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join("\n");
            self.push_section(
                &mut result,
                account,
                &context,
                AccountChunkType::Technologies,
                Priority::Medium,
                body,
                keys,
                &opts.split,
            );
        }

        if !account.contacts.is_empty() {
            // Contact groups never share contacts between chunks.
            let contact_split = SplitOptions {
                chunk_overlap: 0,
                ..opts.split.clone()
            };
            for group in account.contacts.chunks(opts.max_contacts_per_chunk.max(1)) {
                let mut keys = BTreeSet::new();
                let body = group
                    .iter()
                    .map(|c| {
                        keys.insert(c.name.to_lowercase());
                        render_contact(c)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                self.push_section(
                    &mut result,
                    account,
                    &context,
                    AccountChunkType::Contacts,
                    Priority::Medium,
                    body,
                    keys,
                    &contact_split,
                );
            }
        }

        if !account.notes.is_empty() {
            let body = account
                .notes
                .iter()
                .map(|n| match &n.subject {
                    Some(subject) => format!("Note: {}\n{}", subject, n.body),
                    None => format!("Note:\n{}", n.body),
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            self.push_section(
                &mut result,
                account,
                &context,
                AccountChunkType::Notes,
                Priority::Low,
                body,
                BTreeSet::new(),
                &opts.split,
            );
        }

        // Global invariant: every chunk's context keys carry the account
        // number and the lower-cased industry.
        for chunk in &mut result.chunks {
            if let ChunkKind::Account(info) = &mut chunk.kind {
                info.context_keys.insert(account.account_number.clone());
                if let Some(industry) = &account.industry {
                    info.context_keys.insert(industry.to_lowercase());
                }
            }
        }

        for chunk in &result.chunks {
            if let ChunkKind::Account(info) = &chunk.kind {
                *result
                    .chunk_type_counts
                    .entry(info.chunk_type.as_str().to_string())
                    .or_default() += 1;
            }
        }

        debug!(
            account = %account.account_number,
            chunks = result.chunks.len(),
            "chunked account"
        );
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn push_section(
        &self,
        result: &mut AccountChunkResult,
        account: &AccountRecord,
        context: &str,
        chunk_type: AccountChunkType,
        priority: Priority,
        body: String,
        context_keys: BTreeSet<String>,
        split: &SplitOptions,
    ) {
        if body.trim().is_empty() {
            result
                .warnings
                .push(format!("section {} produced no text", chunk_type.as_str()));
            return;
        }
        let priority = priority.elevated_for_gem(account.gem);
        let seq_base = result
            .chunks
            .iter()
            .filter(|c| matches!(&c.kind, ChunkKind::Account(i) if i.chunk_type == chunk_type))
            .count();

        for (i, piece) in self.splitter.split(&body, split).into_iter().enumerate() {
            // Re-prefix each piece so it embeds self-described.
            let text = format!("{}\n{}", context, piece.text);
            let base = TextChunk::new(
                text.clone(),
                count_tokens(&text),
                piece.start_index,
                piece.end_index,
                sentence_spans(&text).len(),
            );
            result.chunks.push(Chunk {
                base,
                kind: ChunkKind::Account(AccountInfo {
                    account_number: account.account_number.clone(),
                    account_name: account.account_name.clone(),
                    chunk_id: format!(
                        "{}-{}-{}",
                        account.account_number,
                        chunk_type.as_str(),
                        seq_base + i
                    ),
                    chunk_type,
                    priority,
                    context_keys: context_keys.clone(),
                }),
            });
        }
    }
}

/// Deterministic context line prepended to every account chunk.
fn context_prefix(account: &AccountRecord) -> String {
    let mut prefix = format!(
        "Account: {} ({})",
        account.account_name, account.account_number
    );
    if let Some(industry) = &account.industry {
        prefix.push_str(&format!(" | Industry: {}", industry));
    }
    if let Some(status) = &account.status {
        prefix.push_str(&format!(" | Status: {}", status));
    }
    prefix
}

fn render_contact(c: &Contact) -> String {
    let mut line = format!("Contact: {}", c.name);
    if let Some(title) = &c.title {
        line.push_str(&format!(", {}", title));
    }
    if let Some(email) = &c.email {
        line.push_str(&format!(" | Email: {}", email));
    }
    if let Some(phone) = &c.phone {
        line.push_str(&format!(" | Phone: {}", phone));
    }
    if let Some(notes) = &c.notes {
        line.push_str(&format!("\n  {}", notes));
    }
    line
}
