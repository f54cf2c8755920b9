//! Chunk emission: per-entity sections cut to the token budget, plus the
//! on-disk corpus (`md/*.md` and `chunks.jsonl`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use schemalib_shared::io::{ensure_dir, read_json, write_atomic};
use schemalib_shared::{AnnotatedEntity, CorpusConfig, Result, SchemaLibError};

use crate::render::{
    entity_markdown, overview_block, relationships_block, sanitize_filename, security_block,
    slim_field_lines, sorted_fields, usage_block,
};
use crate::split::Splitter;
use crate::tokens::TokenEstimator;

const MARKDOWN_DIR: &str = "md";
const CHUNKS_FILE: &str = "chunks.jsonl";

// ---------------------------------------------------------------------------
// Chunk types
// ---------------------------------------------------------------------------

/// One unit of corpus text, as written to `chunks.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub object: String,
    pub section: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub api_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub is_likely_junction: bool,
    #[serde(default)]
    pub estimated_tokens: usize,

    // Split sections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_parts: Option<usize>,
    /// Ids of every part of the section, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_chunk_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap_chars: Option<usize>,

    // Field listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_batch: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_field_batches: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fields: Option<usize>,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Renders entities into budgeted chunks.
#[derive(Debug, Clone)]
pub struct ChunkEmitter {
    splitter: Splitter,
    config: CorpusConfig,
}

impl ChunkEmitter {
    pub fn new(config: CorpusConfig) -> Self {
        let estimator = TokenEstimator::from_config(&config);
        Self::with_estimator(config, estimator)
    }

    pub fn with_estimator(config: CorpusConfig, estimator: TokenEstimator) -> Self {
        Self {
            splitter: Splitter::new(estimator, config.max_tokens, config.overlap_tokens),
            config,
        }
    }

    pub fn splitter(&self) -> &Splitter {
        &self.splitter
    }

    /// The markdown document for `entity`.
    pub fn markdown(&self, entity: &AnnotatedEntity) -> String {
        entity_markdown(entity, self.config.top_fill, self.config.max_field_rows)
    }

    /// All chunks for `entity`, in section order. Every chunk's text is
    /// within the token budget.
    pub fn emit(&self, entity: &AnnotatedEntity) -> Vec<Chunk> {
        let name = &entity.describe.name;
        let base = ChunkMetadata {
            api_name: name.clone(),
            label: entity.describe.label.clone(),
            custom: entity.describe.custom,
            namespace: entity.metadata.namespace.clone(),
            is_likely_junction: entity.metadata.is_likely_junction,
            ..ChunkMetadata::default()
        };

        let mut chunks = Vec::new();
        self.push_section(&mut chunks, name, "overview", &overview_block(entity), &base);
        self.push_section(&mut chunks, name, "relationships", &relationships_block(entity), &base);
        self.push_section(
            &mut chunks,
            name,
            "usage",
            &usage_block(entity, self.config.top_fill),
            &base,
        );

        let fields = sorted_fields(entity);
        let total_fields = fields.len();
        if total_fields > self.config.field_batch_threshold {
            let batch_size = self.config.field_batch_size.max(1);
            let total_batches = total_fields.div_ceil(batch_size);
            for (index, batch) in fields.chunks(batch_size).enumerate() {
                let lines = slim_field_lines(batch);
                let meta = ChunkMetadata {
                    field_batch: Some(index + 1),
                    total_field_batches: Some(total_batches),
                    rows: Some(lines.len()),
                    total_fields: Some(total_fields),
                    ..base.clone()
                };
                let section = format!("fields_slim_batch{}", index + 1);
                self.push_section(&mut chunks, name, &section, &lines.join("\n"), &meta);
            }
        } else {
            let shown: Vec<_> = fields.into_iter().take(self.config.max_field_rows).collect();
            let lines = slim_field_lines(&shown);
            let meta = ChunkMetadata {
                rows: Some(lines.len()),
                total_fields: Some(total_fields),
                ..base.clone()
            };
            self.push_section(&mut chunks, name, "fields_slim", &lines.join("\n"), &meta);
        }

        self.push_section(&mut chunks, name, "security", &security_block(entity), &base);
        chunks
    }

    /// Add `text` as one chunk, or as cross-referenced parts when over budget.
    /// Blank text adds nothing.
    fn push_section(
        &self,
        chunks: &mut Vec<Chunk>,
        entity: &str,
        section: &str,
        text: &str,
        meta: &ChunkMetadata,
    ) {
        if text.trim().is_empty() {
            return;
        }

        let parts = self.splitter.split(text);
        if parts.len() == 1 {
            chunks.push(Chunk {
                id: format!("{entity}:{section}"),
                object: entity.to_string(),
                section: section.to_string(),
                text: text.to_string(),
                metadata: ChunkMetadata {
                    estimated_tokens: self.splitter.estimator().estimate(text),
                    ..meta.clone()
                },
            });
            return;
        }

        let total = parts.len();
        debug!(entity, section, parts = total, "section split");
        let ids: Vec<String> = (1..=total)
            .map(|i| format!("{entity}:{section}_part{i}"))
            .collect();

        for (index, part) in parts.into_iter().enumerate() {
            let overlap_chars = part.text[..part.overlap_len].chars().count();
            chunks.push(Chunk {
                id: ids[index].clone(),
                object: entity.to_string(),
                section: format!("{section}_part{}", index + 1),
                metadata: ChunkMetadata {
                    estimated_tokens: self.splitter.estimator().estimate(&part.text),
                    part: Some(index + 1),
                    total_parts: Some(total),
                    related_chunk_ids: ids.clone(),
                    overlap_chars: Some(overlap_chars),
                    ..meta.clone()
                },
                text: part.text,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Corpus on disk
// ---------------------------------------------------------------------------

/// Which corpus views to write.
#[derive(Debug, Clone, Copy)]
pub struct EmitOptions {
    pub markdown: bool,
    pub jsonl: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            markdown: true,
            jsonl: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorpusReport {
    pub entities: usize,
    pub markdown_files: usize,
    pub chunks: usize,
    /// Chunks that are one part of a split section.
    pub split_chunks: usize,
    /// Unreadable `objects/*.json` files.
    pub skipped: usize,
    pub chunks_path: Option<PathBuf>,
}

/// Read every `objects_dir/*.json` (name order) and write `out_dir/md/*.md`
/// and/or `out_dir/chunks.jsonl`.
#[instrument(skip_all, fields(objects = %objects_dir.display(), out = %out_dir.display()))]
pub fn emit_corpus(
    emitter: &ChunkEmitter,
    objects_dir: &Path,
    out_dir: &Path,
    options: EmitOptions,
) -> Result<CorpusReport> {
    let read_dir = std::fs::read_dir(objects_dir).map_err(|e| SchemaLibError::io(objects_dir, e))?;
    let mut paths: Vec<PathBuf> = read_dir
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let md_dir = out_dir.join(MARKDOWN_DIR);
    if options.markdown {
        ensure_dir(&md_dir)?;
    }

    let mut report = CorpusReport::default();
    let mut jsonl = String::new();

    for path in &paths {
        let entity: AnnotatedEntity = match read_json(path) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable entity");
                report.skipped += 1;
                continue;
            }
        };
        report.entities += 1;

        if options.markdown {
            let file = md_dir.join(sanitize_filename(&format!("{}.md", entity.describe.name)));
            write_atomic(&file, emitter.markdown(&entity).as_bytes())?;
            report.markdown_files += 1;
        }

        if options.jsonl {
            for chunk in emitter.emit(&entity) {
                let line = serde_json::to_string(&chunk)
                    .map_err(|e| SchemaLibError::validation(format!("chunk {}: {e}", chunk.id)))?;
                jsonl.push_str(&line);
                jsonl.push('\n');
                report.chunks += 1;
                if chunk.metadata.part.is_some() {
                    report.split_chunks += 1;
                }
            }
        }
    }

    if options.jsonl {
        let path = out_dir.join(CHUNKS_FILE);
        write_atomic(&path, jsonl.as_bytes())?;
        report.chunks_path = Some(path);
    }

    info!(
        entities = report.entities,
        markdown = report.markdown_files,
        chunks = report.chunks,
        split_chunks = report.split_chunks,
        skipped = report.skipped,
        "corpus emitted"
    );
    Ok(report)
}

/// Load a `chunks.jsonl` file. Blank lines are ignored.
pub fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let content = std::fs::read_to_string(path).map_err(|e| SchemaLibError::io(path, e))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                SchemaLibError::parse(format!("{}:{}: {e}", path.display(), n + 1))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::{TextPart, reassemble};
    use serde_json::json;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sl-corpus-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config() -> CorpusConfig {
        CorpusConfig {
            max_tokens: 6000,
            overlap_tokens: 200,
            top_fill: 25,
            max_field_rows: 500,
            field_batch_threshold: 100,
            field_batch_size: 50,
            tokenizer_file: None,
        }
    }

    fn entity(name: &str, field_count: usize) -> AnnotatedEntity {
        let fields: Vec<_> = (0..field_count)
            .map(|i| json!({"name": format!("Field{i:03}__c"), "type": "string"}))
            .collect();
        serde_json::from_value(json!({
            "name": name,
            "label": name,
            "fields": fields,
            "_relationshipMetadata": {
                "outbound": [], "inbound": [], "outboundClean": [], "inboundClean": [],
                "isLikelyJunction": false,
                "objectSummary": {"custom": false, "queryable": true, "fieldTypeCounts": {}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn small_entity_gets_unsplit_sections() {
        let emitter = ChunkEmitter::new(config());
        let chunks = emitter.emit(&entity("Lead", 3));

        let sections: Vec<_> = chunks.iter().map(|c| c.section.as_str()).collect();
        assert_eq!(sections, vec!["overview", "relationships", "fields_slim"]);
        assert_eq!(chunks[0].id, "Lead:overview");
        assert_eq!(chunks[2].metadata.rows, Some(3));
        assert_eq!(chunks[2].text, "Field000__c : string\nField001__c : string\nField002__c : string");
        assert!(chunks.iter().all(|c| c.metadata.part.is_none()));
    }

    #[test]
    fn wide_entities_batch_their_fields() {
        let emitter = ChunkEmitter::new(config());
        let chunks = emitter.emit(&entity("Wide__c", 120));

        let batches: Vec<_> = chunks
            .iter()
            .filter(|c| c.section.starts_with("fields_slim_batch"))
            .collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].id, "Wide__c:fields_slim_batch3");
        assert_eq!(batches[2].metadata.rows, Some(20));
        assert_eq!(batches[0].metadata.total_field_batches, Some(3));
        assert_eq!(batches[0].metadata.total_fields, Some(120));
    }

    #[test]
    fn oversized_section_splits_with_cross_references() {
        let mut cfg = config();
        cfg.max_tokens = 500;
        cfg.overlap_tokens = 50;
        let emitter = ChunkEmitter::new(cfg);

        let chunks = emitter.emit(&entity("Big__c", 100));
        let parts: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.section.starts_with("fields_slim_part"))
            .collect();
        assert!(parts.len() > 1);

        let ids: Vec<String> = parts.iter().map(|c| c.id.clone()).collect();
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.id, format!("Big__c:fields_slim_part{}", i + 1));
            assert_eq!(part.metadata.part, Some(i + 1));
            assert_eq!(part.metadata.total_parts, Some(parts.len()));
            assert_eq!(part.metadata.related_chunk_ids, ids);
        }
        assert!(chunks.iter().all(|c| emitter.splitter().fits(&c.text)));

        let rebuilt: Vec<TextPart> = parts
            .iter()
            .map(|c| TextPart {
                overlap_len: c
                    .text
                    .char_indices()
                    .nth(c.metadata.overlap_chars.unwrap())
                    .map_or(c.text.len(), |(i, _)| i),
                text: c.text.clone(),
            })
            .collect();
        let lines: Vec<String> = (0..100).map(|i| format!("Field{i:03}__c : string")).collect();
        assert_eq!(reassemble(&rebuilt), lines.join("\n"));
    }

    #[test]
    fn nine_thousand_token_listing_becomes_two_linked_chunks() {
        let mut cfg = config();
        cfg.field_batch_threshold = 1000;
        cfg.max_field_rows = 1000;
        let emitter = ChunkEmitter::new(cfg);

        // 900 rows of 39 chars joined by newlines: just under 9,000 tokens.
        let mut wide = entity("Wide__c", 0);
        wide.describe.fields = (0..900)
            .map(|i| {
                serde_json::from_value(json!({
                    "name": format!("Field_{i:04}__c"),
                    "type": "reference_to_account_id"
                }))
                .unwrap()
            })
            .collect();
        let listing = slim_field_lines(&sorted_fields(&wide)).join("\n");
        assert_eq!(emitter.splitter().estimator().estimate(&listing), 8999);

        let tmp = temp_dir();
        let objects = tmp.join("objects");
        std::fs::create_dir_all(&objects).unwrap();
        std::fs::write(
            objects.join("Wide__c.json"),
            serde_json::to_string(&wide).unwrap(),
        )
        .unwrap();
        let out = tmp.join("corpus");
        let options = EmitOptions {
            markdown: false,
            jsonl: true,
        };
        let report = emit_corpus(&emitter, &objects, &out, options).unwrap();
        assert_eq!(report.split_chunks, 2);

        let chunks = read_chunks(&out.join("chunks.jsonl")).unwrap();
        let parts: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.section.starts_with("fields_slim_part"))
            .collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].id, "Wide__c:fields_slim_part1");
        assert_eq!(parts[1].id, "Wide__c:fields_slim_part2");

        let ids = vec![parts[0].id.clone(), parts[1].id.clone()];
        for part in &parts {
            assert_eq!(part.metadata.related_chunk_ids, ids);
            assert_eq!(part.metadata.total_parts, Some(2));
            assert!(part.metadata.estimated_tokens <= 6000);
        }
        assert_eq!(parts[0].metadata.overlap_chars, Some(0));

        let overlap_chars = parts[1].metadata.overlap_chars.unwrap();
        assert!(overlap_chars > 0);
        let overlap = &parts[1].text[..overlap_chars];
        assert!(emitter.splitter().estimator().estimate(overlap) <= 200);
        assert!(parts[0].text.ends_with(overlap));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn emits_corpus_files_and_reads_them_back() {
        let tmp = temp_dir();
        let objects = tmp.join("objects");
        std::fs::create_dir_all(&objects).unwrap();
        for name in ["Lead", "Case"] {
            let body = serde_json::to_string(&entity(name, 2)).unwrap();
            std::fs::write(objects.join(format!("{name}.json")), body).unwrap();
        }
        std::fs::write(objects.join("Broken.json"), "{").unwrap();

        let emitter = ChunkEmitter::new(config());
        let out = tmp.join("corpus");
        let report = emit_corpus(&emitter, &objects, &out, EmitOptions::default()).unwrap();
        assert_eq!(report.entities, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.markdown_files, 2);
        assert!(out.join("md/Lead.md").exists());

        let chunks = read_chunks(&out.join("chunks.jsonl")).unwrap();
        assert_eq!(chunks.len(), report.chunks);
        assert_eq!(chunks[0].object, "Case");

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
