#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use tether_agent::{Decision, Node};
use tether_core::error::{Result, TetherError};
use tether_core::state::ExecutionState;
use tether_core::types::{ChatMessage, NodeKind};

/// One scripted reaction of a [`ScriptedNode`].
#[derive(Clone)]
pub enum Step {
    Decide(Decision),
    Fail(String),
    Fatal(String),
    Reply(String, Decision),
    TriggerSubGraph { name: String, prompt: String },
    CancelRun(Decision),
}

impl Step {
    pub fn fail(signature: &str) -> Self {
        Step::Fail(signature.to_string())
    }

    pub fn reply(text: &str, decision: Decision) -> Self {
        Step::Reply(text.to_string(), decision)
    }
}

/// A node that plays back a script, repeating the last step once the script
/// runs out, and counts its invocations.
#[derive(Clone)]
pub struct ScriptedNode {
    kind: NodeKind,
    script: Arc<Mutex<VecDeque<Step>>>,
    last: Arc<Mutex<Option<Step>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedNode {
    pub fn new(kind: NodeKind, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            kind,
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A node that always returns `decision`.
    pub fn always(kind: NodeKind, decision: Decision) -> Self {
        Self::new(kind, [Step::Decide(decision)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(step) = script.pop_front() {
            *last = Some(step);
        }
        last.clone().unwrap_or(Step::Decide(Decision::Next))
    }
}

impl Node for ScriptedNode {
    fn kind(&self) -> NodeKind {
        self.kind.clone()
    }

    fn run<'a>(&'a self, state: &'a mut ExecutionState) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.next_step() {
                Step::Decide(decision) => Ok(decision),
                Step::Fail(signature) => Err(TetherError::recognized(signature)),
                Step::Fatal(message) => Err(TetherError::Io(std::io::Error::other(message))),
                Step::Reply(text, decision) => {
                    state.push_message(ChatMessage::assistant(text));
                    Ok(decision)
                }
                Step::TriggerSubGraph { name, prompt } => {
                    state.metadata.trigger_sub_graph(name, prompt);
                    Ok(Decision::trigger_subgraph())
                }
                Step::CancelRun(decision) => {
                    state.cancellation().cancel();
                    Ok(decision)
                }
            }
        })
    }
}
