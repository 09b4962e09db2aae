use std::collections::{BTreeMap, HashMap};

use crate::models::{Accumulation, Section, StepSection};
use crate::stream::scanner::{Located, ScanOptions, scan};

/// Derives the complete view for one buffer state. Pure: the same buffer and
/// flag always give the same result.
pub fn derive(buffer: &str, streaming: bool, options: &ScanOptions) -> Accumulation {
    let scanned = scan(buffer, streaming, options);

    let mut located: Vec<Located<Section>> = dedup_steps(scanned.blocks);
    if let Some(answer) = &scanned.final_answer {
        located.push(Located {
            offset: answer.offset,
            value: Section::FinalAnswer {
                text: answer.value.clone(),
            },
        });
    }
    if let Some(output) = &scanned.editable_output {
        located.push(Located {
            offset: output.offset,
            value: Section::EditableOutput {
                text: output.value.clone(),
            },
        });
    }
    located.sort_by_key(|l| l.offset);

    // Backends don't always emit the marker; a closed, non-empty stream is done.
    let finished = scanned.finished_marker || (!streaming && !buffer.trim().is_empty());

    let mut sections: Vec<Section> = located.into_iter().map(|l| l.value).collect();
    if finished {
        sections.push(Section::Completion {
            finished,
            source_count: scanned.source_count,
        });
    }

    Accumulation {
        sections,
        final_answer: scanned.final_answer.map(|l| l.value),
        editable_output: scanned.editable_output.map(|l| l.value),
        finished,
        source_count: scanned.source_count,
        promoted_answer: scanned.promoted_raw_text,
    }
}

/// One entry per step number; a repeated header replaces the earlier entry
/// unless it would lower its status.
fn dedup_steps(blocks: Vec<Located<Section>>) -> Vec<Located<Section>> {
    let mut out: Vec<Located<Section>> = Vec::with_capacity(blocks.len());
    let mut seen: HashMap<u32, usize> = HashMap::new();

    for block in blocks {
        let Section::Step(step) = &block.value else {
            out.push(block);
            continue;
        };
        match seen.get(&step.step_number) {
            Some(&idx) => {
                if let Section::Step(existing) = &mut out[idx].value {
                    if step.status >= existing.status {
                        *existing = step.clone();
                    }
                }
            }
            None => {
                seen.insert(step.step_number, out.len());
                out.push(block);
            }
        }
    }
    out
}

/// Re-derives the view on every fragment and keeps step completion
/// monotonic across derivations of one response.
#[derive(Debug, Default)]
pub struct SectionAccumulator {
    options: ScanOptions,
    completed: BTreeMap<u32, StepSection>,
    latest: Accumulation,
}

impl SectionAccumulator {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            completed: BTreeMap::new(),
            latest: Accumulation::default(),
        }
    }

    pub fn accumulate(&mut self, buffer: &str, streaming: bool) -> Accumulation {
        let mut view = derive(buffer, streaming, &self.options);
        self.merge_completed(&mut view);
        self.latest = view.clone();
        view
    }

    /// The most recent derivation.
    pub fn latest(&self) -> &Accumulation {
        &self.latest
    }

    pub fn reset(&mut self) {
        self.completed.clear();
        self.latest = Accumulation::default();
    }

    fn merge_completed(&mut self, view: &mut Accumulation) {
        for section in view.sections.iter_mut() {
            let Section::Step(step) = section else {
                continue;
            };
            if step.status.is_complete() {
                self.completed.insert(step.step_number, step.clone());
            } else if let Some(done) = self.completed.get(&step.step_number) {
                log::debug!("step {} re-observed as thinking, keeping completed", step.step_number);
                *step = done.clone();
            }
        }

        let missing: Vec<StepSection> = self
            .completed
            .values()
            .filter(|done| view.step(done.step_number).is_none())
            .cloned()
            .collect();
        for done in missing {
            let idx = insertion_index(&view.sections, done.step_number);
            view.sections.insert(idx, Section::Step(done));
        }
    }
}

/// Position for a step that vanished from the latest derivation: before the
/// first higher-numbered step, else after the last step, else ahead of the
/// answer and completion sections.
fn insertion_index(sections: &[Section], step_number: u32) -> usize {
    if let Some(idx) = sections
        .iter()
        .position(|s| s.as_step().is_some_and(|step| step.step_number > step_number))
    {
        return idx;
    }
    if let Some(idx) = sections.iter().rposition(|s| s.as_step().is_some()) {
        return idx + 1;
    }
    sections
        .iter()
        .position(|s| {
            matches!(
                s,
                Section::FinalAnswer { .. } | Section::EditableOutput { .. } | Section::Completion { .. }
            )
        })
        .unwrap_or(sections.len())
}
