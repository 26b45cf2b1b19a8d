#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use turborecover::history::{SessionLog, DEFAULT_HISTORY_FILE};
use turborecover::runner::{self, CommandLine, CommandRunner};
use turborecover::{Orchestrator, Workspace};

pub const ENERGY: &str = "$energy      SCF               SCFKIN            SCFPOT
     1   -76.01074651550    75.86946282900  -151.88020934450
     2   -76.01223584230    75.91042193250  -151.92265777480
     3   -76.01229773930    75.92118417450  -151.93348191380
$end
";

pub const GRADIENT: &str = "$grad          cartesian gradients
  cycle =      1    SCF energy =     -76.0107465155   |dE/dxyz| =  0.059620
    0.00000000000000      0.00000000000000     -0.12918654808898      o
    0.00000000000000     -1.42491813995600      1.02522027941600      h
   0.00000000000000D+00  0.00000000000000D+00  0.22548307651570D-01
   0.00000000000000D+00 -0.17431542936300D-01 -0.11274153825785D-01
  cycle =      2    SCF energy =     -76.0122358423   |dE/dxyz| =  0.012090
    0.00000000000000      0.00000000000000     -0.10230013205870      o
    0.00000000000000     -1.45105310040900      1.01177701400735      h
   0.00000000000000D+00  0.00000000000000D+00  0.53201474126550D-02
   0.00000000000000D+00 -0.38217035110010D-02 -0.26600737063275D-02
  cycle =      3    SCF energy =     -76.0122977393   |dE/dxyz| =  0.001210
    0.00000000000000      0.00000000000000     -0.09876543210000      o
    0.00000000000000     -1.45500000000000      1.00938271605000      h
   0.00000000000000D+00  0.00000000000000D+00  0.61234567890000D-03
   0.00000000000000D+00 -0.42000000000000D-03 -0.30617283945000D-03
$end
";

pub const COORD: &str = "$coord
    0.00000000000000      0.00000000000000     -0.09876543210000      o
    0.00000000000000     -1.45500000000000      1.00938271605000      h
$end
";

pub const CONTROL: &str = "$title
water
$symmetry c1
$rij
$optimize
   internal   off
   redundant  on
   cartesian  off
$end
";

/// Temporary Turbomole directory holding the given files.
pub fn workspace_with(files: &[(&str, &str)]) -> (TempDir, Workspace) {
    let temp_dir = TempDir::new().unwrap();
    for (name, content) in files {
        fs::write(temp_dir.path().join(name), content).unwrap();
    }
    let workspace = Workspace::open(temp_dir.path()).unwrap();
    (temp_dir, workspace)
}

/// A finished three-step optimization of water.
pub fn optimization_workspace() -> (TempDir, Workspace) {
    workspace_with(&[
        ("energy", ENERGY),
        ("gradient", GRADIENT),
        ("coord", COORD),
        ("control", CONTROL),
    ])
}

/// Orchestrator writing a quiet log into the workspace.
pub fn orchestrator(workspace: Workspace, runner: ScriptedRunner) -> Orchestrator<ScriptedRunner> {
    let log = SessionLog::in_dir(workspace.dir(), DEFAULT_HISTORY_FILE).quiet();
    Orchestrator::new(workspace, runner)
        .with_log(log)
        .with_echo_output(false)
}

type Action = Box<dyn Fn(&Path) -> String>;

/// Replays scripted output per program name and records every call.
///
/// Each program has a queue of actions; the last one repeats once the
/// queue is drained. Programs without a script print nothing.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: RefCell<HashMap<String, VecDeque<Action>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues plain outputs for `program`.
    pub fn outputs(self, program: &str, outputs: &[&str]) -> Self {
        for output in outputs {
            let output = output.to_string();
            self.push(program, Box::new(move |_| output.clone()));
        }
        self
    }

    /// Queues an action that may modify the workspace before returning output.
    pub fn action(self, program: &str, action: impl Fn(&Path) -> String + 'static) -> Self {
        self.push(program, Box::new(action));
        self
    }

    fn push(&self, program: &str, action: Action) {
        self.scripts
            .borrow_mut()
            .entry(program.to_string())
            .or_default()
            .push_back(action);
    }

    /// Every command line run so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of runs of `program`.
    pub fn count(&self, program: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(program))
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &CommandLine, workdir: &Path) -> runner::Result<String> {
        self.calls.borrow_mut().push(command.to_string());
        let mut scripts = self.scripts.borrow_mut();
        let Some(queue) = scripts.get_mut(command.program_name()) else {
            return Ok(String::new());
        };
        let text = if queue.len() > 1 {
            queue.pop_front().map(|action| action(workdir))
        } else {
            queue.front().map(|action| action(workdir))
        };
        Ok(text.unwrap_or_default())
    }
}

/// Appends energy records after the existing ones, as a finished cycle would.
pub fn append_energy_records(dir: &Path, records: &[&str]) {
    let path = dir.join("energy");
    let content = fs::read_to_string(&path).unwrap_or_else(|_| "$energy\n$end\n".to_string());
    let mut out: String = content
        .lines()
        .filter(|l| l.trim() != "$end")
        .map(|l| format!("{}\n", l))
        .collect();
    for record in records {
        out.push_str(record);
        out.push('\n');
    }
    out.push_str("$end\n");
    fs::write(path, out).unwrap();
}
