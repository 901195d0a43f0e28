//! Per-run diagnostic state.
//!
//! Owned by exactly one engine run. The controller enforces the iteration and
//! depth bounds here, not the phases.

use netpilot_shared::{Hypothesis, Layer, NetpilotError, Phase, Query, Result, Transition};
use std::collections::VecDeque;
use tracing::info;

/// A scoped piece of work for one QUICK_PASS round
#[derive(Debug, Clone, PartialEq)]
pub struct SubProblem {
    pub layers: Vec<Layer>,
    pub targets: Vec<String>,
    pub depth: u32,
    pub parent: Option<u32>,
}

impl SubProblem {
    pub fn root(layers: Vec<Layer>, targets: Vec<String>) -> Self {
        Self { layers, targets, depth: 0, parent: None }
    }
}

pub struct DiagnosticState {
    pub query: Query,
    hypotheses: Vec<Hypothesis>,
    iteration: u32,
    max_iterations: u32,
    depth: u32,
    max_depth: u32,
    max_depth_reached: u32,
    queue: VecDeque<SubProblem>,
    next_id: u32,
    phase: Phase,
    trail: Vec<Transition>,
}

impl DiagnosticState {
    pub fn new(query: Query, max_iterations: u32, max_depth: u32) -> Self {
        Self {
            query,
            hypotheses: Vec::new(),
            iteration: 0,
            max_iterations,
            depth: 0,
            max_depth,
            max_depth_reached: 0,
            queue: VecDeque::new(),
            next_id: 1,
            phase: Phase::QuickPass,
            trail: Vec::new(),
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn max_depth_reached(&self) -> u32 {
        self.max_depth_reached
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn can_iterate(&self) -> bool {
        self.iteration < self.max_iterations
    }

    pub fn can_descend(&self) -> bool {
        self.depth < self.max_depth
    }

    /// Start a QUICK_PASS round for a sub-problem
    pub fn begin_iteration(&mut self, sub: &SubProblem) -> Result<u32> {
        if self.iteration >= self.max_iterations {
            return Err(NetpilotError::IterationLimitExceeded(self.max_iterations));
        }
        self.iteration += 1;
        self.depth = sub.depth;
        self.max_depth_reached = self.max_depth_reached.max(sub.depth);
        Ok(self.iteration)
    }

    pub fn push(&mut self, sub: SubProblem) -> Result<()> {
        if sub.depth > self.max_depth {
            return Err(NetpilotError::RecursionLimitExceeded(self.max_depth));
        }
        self.queue.push_back(sub);
        Ok(())
    }

    pub fn next_subproblem(&mut self) -> Option<SubProblem> {
        self.queue.pop_front()
    }

    pub fn add_hypothesis(&mut self, layer: Layer, claim: impl Into<String>, targets: Vec<String>, sub: &SubProblem) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        let mut hypothesis = Hypothesis::new(id, layer, claim, targets);
        hypothesis.depth = sub.depth;
        hypothesis.parent = sub.parent;
        self.hypotheses.push(hypothesis);
        id
    }

    pub fn hypothesis(&self, id: u32) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|h| h.id == id)
    }

    pub fn hypothesis_mut(&mut self, id: u32) -> Option<&mut Hypothesis> {
        self.hypotheses.iter_mut().find(|h| h.id == id)
    }

    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    /// Hypotheses not yet refined by a child, best first
    pub fn frontier(&self) -> Vec<&Hypothesis> {
        let mut open: Vec<&Hypothesis> = self
            .hypotheses
            .iter()
            .filter(|h| !self.hypotheses.iter().any(|c| c.parent == Some(h.id)))
            .collect();
        open.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()).then(a.id.cmp(&b.id)));
        open
    }

    /// Leader and its margin over the runner-up
    pub fn leader(&self) -> Option<(&Hypothesis, f64)> {
        let open = self.frontier();
        let top = *open.first()?;
        let second = open.get(1).map(|h| h.confidence()).unwrap_or(0.0);
        Some((top, top.confidence() - second))
    }

    /// Hypothesis followed by its ancestors
    pub fn chain(&self, id: u32) -> Vec<Hypothesis> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            match self.hypothesis(current) {
                Some(h) if !chain.iter().any(|c: &Hypothesis| c.id == h.id) => {
                    next = h.parent;
                    chain.push(h.clone());
                }
                _ => break,
            }
        }
        chain
    }

    pub fn transition(&mut self, to: Phase, note: impl Into<String>) {
        let note = note.into();
        info!(
            "Diagnosis {} -> {} (iteration {}, depth {}){}",
            self.phase,
            to,
            self.iteration,
            self.depth,
            if note.is_empty() { String::new() } else { format!(": {}", note) }
        );
        self.trail.push(Transition {
            from: self.phase,
            to,
            iteration: self.iteration,
            depth: self.depth,
            note,
        });
        self.phase = to;
    }

    pub fn take_trail(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.trail)
    }

    pub fn invariants_hold(&self) -> bool {
        self.iteration <= self.max_iterations
            && self.max_depth_reached <= self.max_depth
            && self.hypotheses.iter().all(Hypothesis::invariant_holds)
    }
}
