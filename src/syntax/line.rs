//! Single-line tokenization against a compiled grammar
//!
//! Each line is scanned with a trailing `\n` appended so `$` and `\n`
//! patterns behave as grammar authors expect; spans are clamped to the
//! line's own text.

use std::collections::HashMap;

use onig::{Regex, Region, SearchOptions};

use super::grammar::{resolve_back_references, Captures, Grammar, RegionPattern, Rule, RuleId};
use super::state::{Frame, StateStack, MAX_STACK_DEPTH};
use crate::error::SyntaxError;

/// Scoped span within one line, in byte offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
    pub scopes: Vec<String>,
}

type Groups = Vec<Option<(usize, usize)>>;

#[derive(Debug, Clone, Copy)]
enum Candidate {
    /// End pattern of the innermost open region
    End,
    Rule(RuleId),
}

struct Found {
    start: usize,
    end: usize,
    groups: Groups,
    candidate: Candidate,
}

/// Tokenizes lines one at a time, threading a `StateStack` between them
pub(crate) struct LineTokenizer<'g> {
    grammar: &'g Grammar,
    /// End/while patterns compiled after back-reference substitution
    dynamic: HashMap<String, Regex>,
}

impl<'g> LineTokenizer<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self {
            grammar,
            dynamic: HashMap::new(),
        }
    }

    /// Tokenize `line`, advancing `stack` to the state at the next line.
    ///
    /// On error `stack` may be partially advanced; callers discard it.
    pub fn tokenize_line(
        &mut self,
        line_no: usize,
        line: &str,
        stack: &mut StateStack,
    ) -> Result<Vec<Span>, SyntaxError> {
        let text = format!("{}\n", line);
        let mut out = Emitter::new(line.len());

        let pos = self.check_while(line_no, &text, stack, &mut out)?;
        self.scan(line_no, &text, pos, stack, &mut out)?;
        stack.end_line();
        Ok(out.spans)
    }

    /// Match rules from `pos` to the end of `text`, then emit the rest
    /// with the scopes left on `stack`
    fn scan(
        &mut self,
        line_no: usize,
        text: &str,
        mut pos: usize,
        stack: &mut StateStack,
        out: &mut Emitter,
    ) -> Result<(), SyntaxError> {
        let grammar = self.grammar;
        let max_steps = text.len() * 4 + MAX_STACK_DEPTH;
        let mut steps = 0;

        while pos < text.len() {
            steps += 1;
            if steps > max_steps {
                return Err(SyntaxError::Tokenize {
                    line: line_no,
                    reason: "grammar made no progress".to_string(),
                });
            }

            let Some(found) = self.next_match(line_no, text, pos, stack)? else {
                break;
            };

            match found.candidate {
                Candidate::End => {
                    let Some(frame) = stack.pop() else {
                        break;
                    };
                    out.produce(found.start, &frame.content_scopes);
                    if let Rule::BeginEnd { end_captures, .. } = grammar.rule(frame.rule) {
                        self.captures(
                            line_no,
                            text,
                            stack,
                            &found.groups,
                            end_captures,
                            &frame.name_scopes,
                            out,
                        )?;
                    }
                    out.produce(found.end, &frame.name_scopes);

                    // Region opened and closed here without consuming text
                    if found.end == pos && frame.enter_pos == Some(pos) {
                        break;
                    }
                }
                Candidate::Rule(id) => {
                    let base = stack.scopes().to_vec();
                    out.produce(found.start, &base);

                    let progressed = match grammar.rule(id) {
                        Rule::Match { name, captures, .. } => {
                            let scopes = with_scope(&base, name.as_deref());
                            self.captures(
                                line_no,
                                text,
                                stack,
                                &found.groups,
                                captures,
                                &scopes,
                                out,
                            )?;
                            out.produce(found.end, &scopes);
                            found.end > pos
                        }
                        Rule::BeginEnd {
                            name,
                            content_name,
                            begin_captures,
                            end,
                            ..
                        } => {
                            let resolved = end
                                .as_ref()
                                .filter(|end| end.is_dynamic())
                                .map(|end| resolve_back_references(&end.source, text, &found.groups));
                            let region = RegionStart {
                                rule: id,
                                name: name.as_deref(),
                                content_name: content_name.as_deref(),
                                captures: begin_captures,
                                resolved,
                            };
                            self.open_region(line_no, text, stack, out, &found, &base, region)?
                        }
                        Rule::BeginWhile {
                            name,
                            content_name,
                            begin_captures,
                            while_,
                            ..
                        } => {
                            let resolved = while_
                                .is_dynamic()
                                .then(|| resolve_back_references(&while_.source, text, &found.groups));
                            let region = RegionStart {
                                rule: id,
                                name: name.as_deref(),
                                content_name: content_name.as_deref(),
                                captures: begin_captures,
                                resolved,
                            };
                            self.open_region(line_no, text, stack, out, &found, &base, region)?
                        }
                        Rule::Patterns { .. } => true,
                    };

                    if !progressed {
                        break;
                    }
                }
            }

            pos = found.end;
        }

        out.produce(text.len(), stack.scopes());
        Ok(())
    }

    /// Re-check `while` conditions of open begin/while regions at the start
    /// of a line. The first failing region is closed along with everything
    /// opened inside it. Returns the position after consumed while-matches.
    fn check_while(
        &mut self,
        line_no: usize,
        text: &str,
        stack: &mut StateStack,
        out: &mut Emitter,
    ) -> Result<usize, SyntaxError> {
        let grammar = self.grammar;
        let mut pos = 0;
        let mut depth = 1;

        while depth < stack.depth() {
            let frame = &stack.frames[depth];
            if let Rule::BeginWhile {
                while_,
                while_captures,
                ..
            } = grammar.rule(frame.rule)
            {
                let regex = self.region_regex(line_no, while_, frame.resolved.as_deref())?;
                let groups = search(regex, text, pos)
                    .filter(|groups| matches!(groups.first(), Some(Some((start, _))) if *start == pos));

                match groups {
                    Some(groups) => {
                        let end = groups[0].map_or(pos, |(_, end)| end);
                        self.captures(
                            line_no,
                            text,
                            stack,
                            &groups,
                            while_captures,
                            &frame.name_scopes,
                            out,
                        )?;
                        out.produce(end, &frame.name_scopes);
                        pos = end;
                    }
                    None => {
                        tracing::trace!("while condition ended region at line {}", line_no);
                        stack.truncate(depth);
                        break;
                    }
                }
            }
            depth += 1;
        }

        Ok(pos)
    }

    /// Earliest match among the innermost region's end pattern and its
    /// candidate rules. Ties go to the first candidate; the end pattern
    /// comes first unless the region sets `applyEndPatternLast`.
    fn next_match(
        &mut self,
        line_no: usize,
        text: &str,
        pos: usize,
        stack: &StateStack,
    ) -> Result<Option<Found>, SyntaxError> {
        let grammar = self.grammar;
        let frame = stack.top();
        let (end, end_last) = match grammar.rule(frame.rule) {
            Rule::BeginEnd {
                end: Some(end),
                apply_end_last,
                ..
            } => (Some(end), *apply_end_last),
            _ => (None, false),
        };

        let mut best: Option<Found> = None;

        if let Some(end) = end.filter(|_| !end_last) {
            let regex = self.region_regex(line_no, end, frame.resolved.as_deref())?;
            consider(&mut best, search(regex, text, pos), Candidate::End);
        }

        for &id in grammar.candidates(frame.rule) {
            if best.as_ref().is_some_and(|b| b.start == pos) {
                break;
            }
            let regex = match grammar.rule(id) {
                Rule::Match { regex, .. } => regex,
                Rule::BeginEnd { begin, .. } | Rule::BeginWhile { begin, .. } => begin,
                Rule::Patterns { .. } => continue,
            };
            consider(&mut best, search(regex, text, pos), Candidate::Rule(id));
        }

        if let Some(end) = end.filter(|_| end_last) {
            let regex = self.region_regex(line_no, end, frame.resolved.as_deref())?;
            consider(&mut best, search(regex, text, pos), Candidate::End);
        }

        Ok(best)
    }

    fn region_regex<'s>(
        &'s mut self,
        line_no: usize,
        pattern: &'g RegionPattern,
        resolved: Option<&str>,
    ) -> Result<&'s Regex, SyntaxError> {
        if let Some(regex) = &pattern.compiled {
            return Ok(regex);
        }

        let source = resolved.unwrap_or(&pattern.source);
        if !self.dynamic.contains_key(source) {
            let regex = Regex::new(source).map_err(|e| SyntaxError::Tokenize {
                line: line_no,
                reason: format!("invalid back-referenced pattern {:?}: {}", source, e),
            })?;
            self.dynamic.insert(source.to_owned(), regex);
        }
        Ok(&self.dynamic[source])
    }

    /// Emit the begin match and push the region. Returns false when the
    /// begin matched empty text at a spot where the same region was just
    /// entered.
    #[allow(clippy::too_many_arguments)]
    fn open_region(
        &mut self,
        line_no: usize,
        text: &str,
        stack: &mut StateStack,
        out: &mut Emitter,
        found: &Found,
        base: &[String],
        region: RegionStart<'g>,
    ) -> Result<bool, SyntaxError> {
        let name_scopes = with_scope(base, region.name);
        self.captures(
            line_no,
            text,
            stack,
            &found.groups,
            region.captures,
            &name_scopes,
            out,
        )?;
        out.produce(found.end, &name_scopes);

        let top = stack.top();
        if found.start == found.end && top.rule == region.rule && top.enter_pos == Some(found.start) {
            return Ok(false);
        }

        let content_scopes = with_scope(&name_scopes, region.content_name);
        let pushed = stack.push(Frame {
            rule: region.rule,
            name_scopes,
            content_scopes,
            resolved: region.resolved,
            enter_pos: Some(found.start),
        });
        if !pushed {
            return Err(stack_overflow(line_no));
        }
        Ok(true)
    }

    /// Emit capture groups. Groups nested inside an earlier group get that
    /// group's scopes as their parent; a capture with its own patterns is
    /// tokenized again over the captured text.
    #[allow(clippy::too_many_arguments)]
    fn captures(
        &mut self,
        line_no: usize,
        text: &str,
        stack: &StateStack,
        groups: &Groups,
        captures: &'g Captures,
        base: &[String],
        out: &mut Emitter,
    ) -> Result<(), SyntaxError> {
        let mut open: Vec<(usize, Vec<String>)> = Vec::new();

        for (index, capture) in captures.iter().enumerate() {
            if capture.is_empty() {
                continue;
            }
            let Some(Some((start, end))) = groups.get(index).copied() else {
                continue;
            };
            if start == end {
                continue;
            }

            while open.last().is_some_and(|(open_end, _)| *open_end <= start) {
                if let Some((open_end, scopes)) = open.pop() {
                    out.produce(open_end, &scopes);
                }
            }

            let (parent_end, parent) = open
                .last()
                .map(|(open_end, scopes)| (*open_end, scopes.clone()))
                .unwrap_or_else(|| (usize::MAX, base.to_vec()));
            out.produce(start, &parent);

            let scopes = with_scope(&parent, capture.name.as_deref());
            let end = end.min(parent_end);
            if let Some(rule) = capture.patterns {
                let mut nested = stack.clone();
                let pushed = nested.push(Frame {
                    rule,
                    name_scopes: scopes.clone(),
                    content_scopes: scopes.clone(),
                    resolved: None,
                    enter_pos: Some(start),
                });
                if !pushed {
                    return Err(stack_overflow(line_no));
                }
                self.scan(line_no, &text[..end], start, &mut nested, out)?;
            }
            open.push((end, scopes));
        }

        while let Some((open_end, scopes)) = open.pop() {
            out.produce(open_end, &scopes);
        }
        Ok(())
    }
}

struct RegionStart<'a> {
    rule: RuleId,
    name: Option<&'a str>,
    content_name: Option<&'a str>,
    captures: &'a Captures,
    resolved: Option<String>,
}

fn stack_overflow(line_no: usize) -> SyntaxError {
    SyntaxError::Tokenize {
        line: line_no,
        reason: format!("rule stack exceeded {} frames", MAX_STACK_DEPTH),
    }
}

fn search(regex: &Regex, text: &str, from: usize) -> Option<Groups> {
    let mut region = Region::new();
    regex.search_with_options(
        text,
        from,
        text.len(),
        SearchOptions::SEARCH_OPTION_NONE,
        Some(&mut region),
    )?;
    Some((0..region.len()).map(|i| region.pos(i)).collect())
}

fn consider(best: &mut Option<Found>, groups: Option<Groups>, candidate: Candidate) {
    let Some(groups) = groups else {
        return;
    };
    let Some(Some((start, end))) = groups.first().copied() else {
        return;
    };
    if best.as_ref().map_or(true, |b| start < b.start) {
        *best = Some(Found {
            start,
            end,
            groups,
            candidate,
        });
    }
}

/// `base` plus each whitespace-separated scope in `name`
fn with_scope(base: &[String], name: Option<&str>) -> Vec<String> {
    let mut scopes = base.to_vec();
    if let Some(name) = name {
        scopes.extend(name.split_whitespace().map(str::to_owned));
    }
    scopes
}

/// Collects spans, never emitting empty ones or text past the line end
struct Emitter {
    spans: Vec<Span>,
    last: usize,
    limit: usize,
}

impl Emitter {
    fn new(limit: usize) -> Self {
        Self {
            spans: Vec::new(),
            last: 0,
            limit,
        }
    }

    fn produce(&mut self, upto: usize, scopes: &[String]) {
        let upto = upto.min(self.limit);
        if upto > self.last {
            self.spans.push(Span {
                start: self.last,
                end: upto,
                scopes: scopes.to_vec(),
            });
            self.last = upto;
        }
    }
}
