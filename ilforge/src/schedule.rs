//! Phase-ordered, dependency-driven execution of compile steps.
//!
//! Within a phase a step becomes ready once every input key has been
//! produced, either by an earlier phase or by a step already run in this
//! phase. Among ready steps the one generated first always runs first, so
//! the order, and with it the emitted module, is deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::backend::Backend;
use crate::error::{BuildError, BuildResult, StuckStep, UnmetReason};
use crate::key::ItemKey;
use crate::slot::SlotTable;

pub type StepAction<B> = Box<dyn FnOnce(&mut B, &SlotTable<B>) -> BuildResult<()>>;

/// A unit of build work.
///
/// The action may read only the slots of `inputs` and must write exactly
/// the slots of `outputs`.
pub struct CompileStep<B: Backend> {
    pub phase: u32,
    pub description: String,
    pub inputs: BTreeSet<ItemKey>,
    pub outputs: BTreeSet<ItemKey>,
    action: StepAction<B>,
}

impl<B: Backend> CompileStep<B> {
    pub fn new(
        phase: u32,
        description: impl Into<String>,
        inputs: BTreeSet<ItemKey>,
        outputs: BTreeSet<ItemKey>,
        action: impl FnOnce(&mut B, &SlotTable<B>) -> BuildResult<()> + 'static,
    ) -> Self {
        Self {
            phase,
            description: description.into(),
            inputs,
            outputs,
            action: Box::new(action),
        }
    }
}

impl<B: Backend> fmt::Debug for CompileStep<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileStep")
            .field("phase", &self.phase)
            .field("description", &self.description)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Computes the execution order of `steps` as indices into the slice.
pub fn plan<B: Backend>(steps: &[CompileStep<B>]) -> BuildResult<Vec<usize>> {
    let mut producers: BTreeMap<&ItemKey, usize> = BTreeMap::new();
    for (index, step) in steps.iter().enumerate() {
        for key in &step.outputs {
            if producers.insert(key, index).is_some() {
                return Err(BuildError::SingleAssignment { key: key.clone() });
            }
        }
    }

    let phases: BTreeSet<u32> = steps.iter().map(|step| step.phase).collect();
    let mut available: BTreeSet<&ItemKey> = BTreeSet::new();
    let mut order = Vec::with_capacity(steps.len());

    for phase in phases {
        let members: Vec<usize> = (0..steps.len())
            .filter(|&index| steps[index].phase == phase)
            .collect();
        log::debug!("phase {phase}: {} steps", members.len());

        let mut missing: BTreeMap<usize, usize> = BTreeMap::new();
        let mut waiting: BTreeMap<&ItemKey, Vec<usize>> = BTreeMap::new();
        let mut ready: BTreeSet<usize> = BTreeSet::new();
        for &index in &members {
            let unmet: Vec<&ItemKey> = steps[index]
                .inputs
                .iter()
                .filter(|key| !available.contains(key))
                .collect();
            if unmet.is_empty() {
                ready.insert(index);
            } else {
                missing.insert(index, unmet.len());
                for key in unmet {
                    waiting.entry(key).or_default().push(index);
                }
            }
        }

        while let Some(index) = ready.pop_first() {
            order.push(index);
            for key in &steps[index].outputs {
                if !available.insert(key) {
                    continue;
                }
                for waiter in waiting.remove(key).unwrap_or_default() {
                    if let Some(count) = missing.get_mut(&waiter) {
                        *count -= 1;
                        if *count == 0 {
                            missing.remove(&waiter);
                            ready.insert(waiter);
                        }
                    }
                }
            }
        }

        if !missing.is_empty() {
            let stuck = missing
                .keys()
                .map(|&index| stuck_step(steps, index, &available, &producers))
                .collect();
            return Err(BuildError::Scheduling { phase, stuck });
        }
    }
    Ok(order)
}

fn stuck_step<B: Backend>(
    steps: &[CompileStep<B>],
    index: usize,
    available: &BTreeSet<&ItemKey>,
    producers: &BTreeMap<&ItemKey, usize>,
) -> StuckStep {
    let step = &steps[index];
    let unmet = step
        .inputs
        .iter()
        .filter(|key| !available.contains(key))
        .map(|key| {
            let reason = match producers.get(key) {
                None => UnmetReason::NoProducer,
                Some(&producer) if steps[producer].phase > step.phase => {
                    UnmetReason::LaterPhase(steps[producer].phase)
                }
                Some(_) => UnmetReason::Blocked,
            };
            (key.clone(), reason)
        })
        .collect();
    StuckStep {
        description: step.description.clone(),
        unmet,
    }
}

/// Plans and runs every step. Returns the descriptions in execution order.
pub fn execute<B: Backend>(
    backend: &mut B,
    slots: &mut SlotTable<B>,
    steps: Vec<CompileStep<B>>,
) -> BuildResult<Vec<String>> {
    let order = plan(&steps)?;
    for step in &steps {
        for key in &step.outputs {
            slots.create(key);
        }
    }

    let mut steps: Vec<Option<CompileStep<B>>> = steps.into_iter().map(Some).collect();
    let mut executed = Vec::with_capacity(order.len());
    for index in order {
        let Some(step) = steps[index].take() else {
            continue;
        };
        log::debug!("phase {} step {}", step.phase, step.description);
        (step.action)(backend, &*slots)?;
        if let Some(key) = step.outputs.iter().find(|key| !slots.is_written(key)) {
            return Err(BuildError::structural(format!(
                "step `{}` finished without producing {key}",
                step.description
            )));
        }
        executed.push(step.description);
    }
    Ok(executed)
}
