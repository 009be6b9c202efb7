use std::collections::{BTreeMap, HashSet};

use crate::errors::AdapterError;

/// Rules of one policy type, in insertion order and free of duplicates.
#[derive(Debug, Clone, Default)]
pub struct Assertion {
    rules: Vec<Vec<String>>,
    index: HashSet<Vec<String>>,
}

impl Assertion {
    pub fn rules(&self) -> &[Vec<String>] {
        &self.rules
    }

    fn contains(&self, rule: &[String]) -> bool {
        self.index.contains(rule)
    }

    fn insert(&mut self, rule: Vec<String>) -> bool {
        if self.index.contains(&rule) {
            return false;
        }
        self.index.insert(rule.clone());
        self.rules.push(rule);
        true
    }

    fn remove(&mut self, rule: &[String]) -> bool {
        if !self.index.remove(rule) {
            return false;
        }
        self.rules.retain(|r| r.as_slice() != rule);
        true
    }

    fn clear(&mut self) {
        self.rules.clear();
        self.index.clear();
    }
}

/// In-memory policy: section (`p`, `g`, ...) -> ptype -> rules.
///
/// The section of a ptype is its first character, so `p2` lives in `p` and
/// `g2` in `g`. Policy types must be registered before rules can be added.
#[derive(Debug, Clone, Default)]
pub struct PolicyModel {
    sections: BTreeMap<String, BTreeMap<String, Assertion>>,
}

/// Section a ptype belongs to.
pub fn section_of(ptype: &str) -> &str {
    ptype
        .char_indices()
        .nth(1)
        .map_or(ptype, |(end, _)| &ptype[..end])
}

impl PolicyModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model with the usual `p` policy and `g` grouping types.
    pub fn rbac() -> Self {
        Self::new().with_policy_type("p").with_policy_type("g")
    }

    pub fn with_policy_type(mut self, ptype: &str) -> Self {
        self.add_policy_type(ptype);
        self
    }

    pub fn add_policy_type(&mut self, ptype: &str) {
        if ptype.is_empty() {
            return;
        }
        self.sections
            .entry(section_of(ptype).to_string())
            .or_default()
            .entry(ptype.to_string())
            .or_default();
    }

    pub fn has_policy_type(&self, sec: &str, ptype: &str) -> bool {
        self.sections
            .get(sec)
            .is_some_and(|types| types.contains_key(ptype))
    }

    /// Registered ptypes of `sec` with their rules, ordered by ptype.
    pub fn section(&self, sec: &str) -> impl Iterator<Item = (&str, &[Vec<String>])> {
        self.sections
            .get(sec)
            .into_iter()
            .flat_map(|types| types.iter())
            .map(|(ptype, assertion)| (ptype.as_str(), assertion.rules()))
    }

    fn assertion(&self, sec: &str, ptype: &str) -> Result<&Assertion, AdapterError> {
        self.sections
            .get(sec)
            .and_then(|types| types.get(ptype))
            .ok_or_else(|| unknown(sec, ptype))
    }

    fn assertion_mut(&mut self, sec: &str, ptype: &str) -> Result<&mut Assertion, AdapterError> {
        self.sections
            .get_mut(sec)
            .and_then(|types| types.get_mut(ptype))
            .ok_or_else(|| unknown(sec, ptype))
    }

    pub fn get_policy(&self, sec: &str, ptype: &str) -> Result<&[Vec<String>], AdapterError> {
        Ok(self.assertion(sec, ptype)?.rules())
    }

    pub fn has_policy(&self, sec: &str, ptype: &str, rule: &[String]) -> Result<bool, AdapterError> {
        Ok(self.assertion(sec, ptype)?.contains(rule))
    }

    /// Returns false when the rule was already present.
    pub fn add_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool, AdapterError> {
        Ok(self.assertion_mut(sec, ptype)?.insert(rule))
    }

    /// Adds nothing and returns false if any of the rules is already present.
    pub fn add_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool, AdapterError> {
        let assertion = self.assertion_mut(sec, ptype)?;
        if rules.iter().any(|rule| assertion.contains(rule)) {
            return Ok(false);
        }
        for rule in rules {
            assertion.insert(rule);
        }
        Ok(true)
    }

    pub fn remove_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> Result<bool, AdapterError> {
        Ok(self.assertion_mut(sec, ptype)?.remove(rule))
    }

    /// Removes nothing and returns false unless every rule is present.
    pub fn remove_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool, AdapterError> {
        let assertion = self.assertion_mut(sec, ptype)?;
        if !rules.iter().all(|rule| assertion.contains(rule)) {
            return Ok(false);
        }
        for rule in rules {
            assertion.remove(rule);
        }
        Ok(true)
    }

    /// Remove every rule whose values at `field_index..` equal `field_values`,
    /// treating empty field values as wildcards. Returns the removed rules.
    pub fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>, AdapterError> {
        let assertion = self.assertion_mut(sec, ptype)?;
        let matches = |rule: &Vec<String>| {
            field_values.iter().enumerate().all(|(offset, value)| {
                value.is_empty()
                    || field_index
                        .checked_add(offset)
                        .and_then(|i| rule.get(i))
                        == Some(value)
            })
        };

        let removed: Vec<Vec<String>> = assertion.rules.iter().filter(|r| matches(r)).cloned().collect();
        for rule in &removed {
            assertion.remove(rule);
        }
        Ok(removed)
    }

    /// Replace `old` with `new` in place. Returns false when `old` is absent
    /// or `new` is already present.
    pub fn update_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        old: &[String],
        new: Vec<String>,
    ) -> Result<bool, AdapterError> {
        let assertion = self.assertion_mut(sec, ptype)?;
        if !assertion.contains(old) || assertion.contains(&new) {
            return Ok(false);
        }
        let Some(position) = assertion.rules.iter().position(|r| r.as_slice() == old) else {
            return Ok(false);
        };
        assertion.index.remove(old);
        assertion.index.insert(new.clone());
        assertion.rules[position] = new;
        Ok(true)
    }

    /// Drop every rule but keep the registered policy types.
    pub fn clear_policy(&mut self) {
        for types in self.sections.values_mut() {
            for assertion in types.values_mut() {
                assertion.clear();
            }
        }
    }

    pub fn policy_count(&self) -> usize {
        self.sections
            .values()
            .flat_map(|types| types.values())
            .map(|assertion| assertion.rules.len())
            .sum()
    }

    /// Apply one decoded line `[ptype, v0, ..]`. Lines already present are
    /// skipped.
    pub fn load_policy_line(&mut self, line: &[String]) -> Result<(), AdapterError> {
        let (ptype, rule) = split_line(line)?;
        self.add_policy(section_of(ptype), ptype, rule.to_vec())?;
        Ok(())
    }

    /// Apply a batch of decoded lines. Every line is checked before any is
    /// applied, so a bad line leaves the model untouched. Returns how many
    /// rules were new.
    pub fn load_policy_lines(&mut self, lines: &[Vec<String>]) -> Result<usize, AdapterError> {
        for line in lines {
            let (ptype, _) = split_line(line)?;
            let sec = section_of(ptype);
            if !self.has_policy_type(sec, ptype) {
                return Err(unknown(sec, ptype));
            }
        }

        let mut added = 0;
        for line in lines {
            let (ptype, rule) = split_line(line)?;
            if self.add_policy(section_of(ptype), ptype, rule.to_vec())? {
                added += 1;
            }
        }
        Ok(added)
    }
}

fn split_line(line: &[String]) -> Result<(&str, &[String]), AdapterError> {
    match line.split_first() {
        Some((ptype, rule)) if !ptype.is_empty() => Ok((ptype.as_str(), rule)),
        _ => Err(AdapterError::InvalidPolicyLine(format!("{line:?}"))),
    }
}

fn unknown(sec: &str, ptype: &str) -> AdapterError {
    AdapterError::UnknownPolicyType {
        sec: sec.to_string(),
        ptype: ptype.to_string(),
    }
}
