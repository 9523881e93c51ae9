//! Prompt state machine for interactive CLI sessions.
//!
//! Every line read from the shell is classified into a state: plain output,
//! a pager prompt, an error line, an input request (e.g. an enable password)
//! or one of the CLI mode prompts declared by a [`PromptTemplate`]. The
//! machine tracks the last state so the session knows when a command has
//! finished, whether it failed, and which commands move it between modes.

use std::collections::{HashMap, HashSet, VecDeque};

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::ConnectError;

/// A CLI mode and the prompts that identify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptState {
    pub state: String,
    pub patterns: Vec<String>,
}

/// What to answer when the device asks for input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputResponse {
    /// Send this literal text.
    Literal(String),
    /// Send the runtime parameter with this name (e.g. a password).
    Param(String),
}

/// A state in which the device waits for input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputState {
    pub state: String,
    pub patterns: Vec<String>,
    pub response: InputResponse,
}

/// A command that moves the CLI from one mode to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: String,
    pub command: String,
    pub to: String,
}

/// Declarative description of a vendor CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: String,
    pub prompts: Vec<PromptState>,
    pub inputs: Vec<InputState>,
    pub more_patterns: Vec<String>,
    pub error_patterns: Vec<String>,
    pub transitions: Vec<ModeTransition>,
}

const OUTPUT: usize = 0;
const MORE: usize = 1;
const ERROR: usize = 2;

pub struct PromptMachine {
    /// Index of the current state in `states`.
    current: usize,

    /// `output`, `more`, `error`, then prompt states, then input states.
    states: Vec<String>,

    /// All patterns, in the order of `pattern_state`.
    patterns: RegexSet,

    /// Maps a pattern index to the state index it identifies.
    pattern_state: Vec<usize>,

    /// Inclusive index range of prompt states in `states`.
    prompt_range: (usize, usize),

    /// State name to response for input states (and the pager).
    inputs: HashMap<String, InputResponse>,

    transitions: Vec<ModeTransition>,

    /// Runtime values for [`InputResponse::Param`].
    params: HashMap<String, String>,
}

impl PromptMachine {
    /// Compiles a template into a state machine.
    pub fn new(
        template: &PromptTemplate,
        params: HashMap<String, String>,
    ) -> Result<Self, ConnectError> {
        let mut states = vec!["output".to_string(), "more".to_string(), "error".to_string()];
        let mut patterns: Vec<String> = Vec::new();
        let mut pattern_state = Vec::new();

        for p in &template.more_patterns {
            patterns.push(p.clone());
            pattern_state.push(MORE);
        }
        for p in &template.error_patterns {
            patterns.push(p.clone());
            pattern_state.push(ERROR);
        }

        let prompt_start = states.len();
        for prompt in &template.prompts {
            let index = states.len();
            states.push(prompt.state.to_ascii_lowercase());
            for p in &prompt.patterns {
                // Prompts may arrive behind NULs or a lone carriage return.
                patterns.push(format!(r"^\x00*\r?{}", p.trim_start_matches('^')));
                pattern_state.push(index);
            }
        }
        if states.len() == prompt_start {
            return Err(ConnectError::InvalidTemplate(format!(
                "template '{}' declares no prompt",
                template.name
            )));
        }
        let prompt_range = (prompt_start, states.len() - 1);

        let mut inputs = HashMap::new();
        for input in &template.inputs {
            let index = states.len();
            let state = input.state.to_ascii_lowercase();
            states.push(state.clone());
            for p in &input.patterns {
                patterns.push(p.clone());
                pattern_state.push(index);
            }
            inputs.insert(state, input.response.clone());
        }
        inputs.insert("more".to_string(), InputResponse::Literal(" ".to_string()));

        let patterns = RegexSet::new(&patterns).map_err(|err| {
            ConnectError::InvalidTemplate(format!("failed to build state regex set: {err}"))
        })?;

        let transitions = template
            .transitions
            .iter()
            .map(|t| ModeTransition {
                from: t.from.to_ascii_lowercase(),
                command: t.command.clone(),
                to: t.to.to_ascii_lowercase(),
            })
            .collect();

        Ok(Self {
            current: OUTPUT,
            states,
            patterns,
            pattern_state,
            prompt_range,
            inputs,
            transitions,
            params,
        })
    }

    fn classify(&self, line: &str) -> usize {
        self.patterns
            .matches(line)
            .into_iter()
            .next()
            .and_then(|i| self.pattern_state.get(i).copied())
            .unwrap_or(OUTPUT)
    }

    fn is_prompt_index(&self, index: usize) -> bool {
        let (start, end) = self.prompt_range;
        index >= start && index <= end
    }

    /// Feeds one line of device output and updates the current state.
    pub fn read(&mut self, line: &str) {
        trace!("Read line: '{:?}'", line);
        self.current = self.classify(line);
    }

    /// Returns true if `line` is a mode prompt. Does not change state.
    pub fn is_prompt(&self, line: &str) -> bool {
        self.is_prompt_index(self.classify(line))
    }

    /// Returns the text to send if `line` is an input request.
    pub fn input_for(&self, line: &str) -> Option<String> {
        let state = self.states.get(self.classify(line))?;
        match self.inputs.get(state)? {
            InputResponse::Literal(text) => Some(text.clone()),
            InputResponse::Param(name) => self.params.get(name).cloned(),
        }
    }

    pub fn current_state(&self) -> &str {
        self.states
            .get(self.current)
            .map(|s| s.as_str())
            .unwrap_or("output")
    }

    /// True while the last classified line was an error line.
    pub fn error(&self) -> bool {
        self.current == ERROR
    }

    /// Shortest list of `(command, resulting_state)` pairs that moves the CLI
    /// from the current mode to `target`.
    pub fn transition_path(&self, target: &str) -> Result<Vec<(String, String)>, ConnectError> {
        let start = self.current_state().to_string();
        let target = target.to_ascii_lowercase();
        if start == target {
            return Ok(Vec::new());
        }

        let mut adjacency: HashMap<&str, Vec<&ModeTransition>> = HashMap::new();
        for t in &self.transitions {
            adjacency.entry(t.from.as_str()).or_default().push(t);
        }

        let mut queue = VecDeque::from([start.clone()]);
        let mut visited = HashSet::from([start.clone()]);
        let mut predecessors: HashMap<String, (String, String)> = HashMap::new();

        while let Some(node) = queue.pop_front() {
            if node == target {
                break;
            }
            for edge in adjacency.get(node.as_str()).into_iter().flatten() {
                if visited.insert(edge.to.clone()) {
                    predecessors.insert(edge.to.clone(), (node.clone(), edge.command.clone()));
                    queue.push_back(edge.to.clone());
                }
            }
        }

        if !predecessors.contains_key(&target) {
            return Err(ConnectError::UnreachableMode(target));
        }

        let mut path = Vec::new();
        let mut node = target;
        while node != start {
            let Some((parent, command)) = predecessors.get(&node) else {
                return Err(ConnectError::UnreachableMode(node));
            };
            path.push((command.clone(), node.clone()));
            node = parent.clone();
        }
        path.reverse();
        trace!("Mode path: '{:?}'", path);
        Ok(path)
    }
}

/// Carriage returns and backspaces some CLIs emit at the start of a line.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );
