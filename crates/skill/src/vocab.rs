//! Whole-word vocabulary matching.
//!
//! The match direction is deliberately vocabulary-in-utterance so the
//! user can say "yes, please" and still match a list containing only
//! "yes".

use crate::context::SkillContext;
use regex::Regex;
use skylark_core::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub struct VocabularyMatcher {
    ctx: Arc<SkillContext>,
    // (lang, vocab name) -> compiled whole-word patterns, one per surface
    // form. Entries are populated once and never invalidated for the
    // skill's lifetime.
    cache: RwLock<HashMap<(String, String), Arc<Vec<Regex>>>>,
}

impl VocabularyMatcher {
    pub fn new(ctx: Arc<SkillContext>) -> Self {
        Self {
            ctx,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the utterance contains any surface form of the named
    /// vocabulary as a whole word. An empty utterance never matches.
    ///
    /// The vocabulary file is looked up first under the skill's own
    /// resources, then under the shared fallback tree, and read at most
    /// once per (language, name) pair.
    pub fn matches(&self, utterance: &str, voc_name: &str, lang: Option<&str>) -> Result<bool> {
        let lang = lang.unwrap_or(&self.ctx.lang).to_string();
        let vocab = self.load(&lang, voc_name)?;

        if utterance.is_empty() {
            return Ok(false);
        }
        Ok(vocab.iter().any(|re| re.is_match(utterance)))
    }

    fn load(&self, lang: &str, voc_name: &str) -> Result<Arc<Vec<Regex>>> {
        let key = (lang.to_string(), voc_name.to_string());
        if let Some(vocab) = self.cache.read().unwrap().get(&key) {
            return Ok(vocab.clone());
        }

        let file_name = format!("{voc_name}.voc");
        let path = self
            .ctx
            .locator
            .find_resource(&file_name, Some("vocab"))
            .or_else(|| {
                self.ctx
                    .locator
                    .find_shared_resource(&format!("text/{lang}/{file_name}"))
            })
            .ok_or_else(|| Error::ResourceNotFound(file_name.clone()))?;

        let mut patterns = Vec::new();
        for phrase in read_vocab_file(&path)? {
            let re = Regex::new(&format!(r"\b{}\b", regex::escape(&phrase)))
                .map_err(|e| Error::Validation(format!("bad vocab phrase '{phrase}': {e}")))?;
            patterns.push(re);
        }
        let vocab = Arc::new(patterns);
        debug!(vocab = %voc_name, lang = %lang, entries = vocab.len(), "cached vocabulary");
        let mut cache = self.cache.write().unwrap();
        // First writer wins; the entry is immutable once populated.
        Ok(cache.entry(key).or_insert(vocab).clone())
    }
}

/// Parse a vocabulary file into a flat ordered list of surface forms.
/// Each non-comment line is a synonym group separated by '|'.
fn read_vocab_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let mut vocab = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        for form in line.split('|') {
            let form = form.trim();
            if !form.is_empty() {
                vocab.push(form.to_string());
            }
        }
    }
    Ok(vocab)
}
