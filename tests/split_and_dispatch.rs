//! Partitioning a workflow and running the resulting systems as dispatched
//! jobs: the distributed-execution shape the engine exists for.

use std::sync::{Arc, Mutex};

use conflux::prelude::*;

struct Gain {
    input: &'static str,
    output: &'static str,
    gain: f64,
}

impl NodeModel for Gain {
    fn declare_ports(&self) -> Interface {
        Interface::new()
            .input(self.input, PortMeta::scalar(0.0))
            .output(self.output, PortMeta::scalar(0.0))
    }

    fn compute(&mut self, inputs: &ValueMap, outputs: &mut ValueMap) -> Result<(), WorkflowError> {
        let v = inputs.get(self.input).and_then(Value::scalar).unwrap_or(0.0);
        outputs.insert(self.output.to_string(), Value::Scalar(self.gain * v));
        Ok(())
    }
}

struct Sum2 {
    a: &'static str,
    b: &'static str,
    output: &'static str,
}

impl NodeModel for Sum2 {
    fn declare_ports(&self) -> Interface {
        Interface::new()
            .input(self.a, PortMeta::scalar(0.0))
            .input(self.b, PortMeta::scalar(0.0))
            .output(self.output, PortMeta::scalar(0.0))
    }

    fn compute(&mut self, inputs: &ValueMap, outputs: &mut ValueMap) -> Result<(), WorkflowError> {
        let a = inputs.get(self.a).and_then(Value::scalar).unwrap_or(0.0);
        let b = inputs.get(self.b).and_then(Value::scalar).unwrap_or(0.0);
        outputs.insert(self.output.to_string(), Value::Scalar(a + b));
        Ok(())
    }
}

/// wind -> rotor -> {drivetrain, tower}; summary = drivetrain + tower.
fn turbine_like(wf: &mut Workflow) -> (NodeHandle, NodeHandle, NodeHandle, NodeHandle, NodeHandle) {
    let wind = wf.add_independent("wind", "speed", PortMeta::scalar(8.0));
    let rotor = wf.add_node("rotor", Gain {
        input: "speed",
        output: "torque",
        gain: 2.0,
    });
    let drivetrain = wf.add_node("drivetrain", Gain {
        input: "torque",
        output: "power",
        gain: 3.0,
    });
    let tower = wf.add_node("tower", Gain {
        input: "torque",
        output: "load",
        gain: 0.5,
    });
    let summary = wf.add_node("summary", Sum2 {
        a: "power",
        b: "load",
        output: "total",
    });
    wf.connect_auto(rotor, wind).unwrap();
    wf.connect_auto(drivetrain, rotor).unwrap();
    wf.connect_auto(tower, rotor).unwrap();
    wf.connect_auto(summary, drivetrain).unwrap();
    wf.connect_auto(summary, tower).unwrap();
    (wind, rotor, drivetrain, tower, summary)
}

#[test]
fn replaying_links_reproduces_the_unsplit_answer() {
    let mut wf = Workflow::new();
    let (_wind, _rotor, drivetrain, _tower, summary) = turbine_like(&mut wf);

    // speed 8 -> torque 16 -> power 48, load 8 -> total 56.
    assert_eq!(wf.get_output(summary).unwrap()["total"], Value::Scalar(56.0));

    let split = wf.split_workflow(&[drivetrain, summary]).unwrap();
    assert_eq!(split.systems.len(), 2);
    let (sys_a, sys_b) = (split.systems[0], split.systems[1]);

    // Change the wind (now owned by the first system) and replay the links
    // by hand, the way a distributed driver would.
    wf.set_system_input(sys_a, "speed", Value::Scalar(10.0))
        .unwrap();
    let out_a = wf.get_output(sys_a).unwrap();
    for link in &split.links {
        assert_eq!(link.from_system, 0);
        assert_eq!(link.to_system, 1);
        wf.set_system_input(sys_b, &link.to_input, out_a[&link.from_output].clone())
            .unwrap();
    }
    let out_b = wf.get_output(sys_b).unwrap();

    // Unsplit equivalent: torque 20 -> power 60, load 10 -> total 70.
    assert_eq!(out_b["total"], Value::Scalar(70.0));
}

/// A job owning a shared workflow that evaluates one system and parks the
/// result for the caller.
struct SystemJob {
    workflow: Arc<Mutex<Workflow>>,
    system: NodeHandle,
    result: Arc<Mutex<Option<ValueMap>>>,
}

impl Job for SystemJob {
    fn execute(&mut self) -> Result<(), conflux::dispatch::JobError> {
        let mut wf = self
            .workflow
            .lock()
            .map_err(|_| "workflow lock poisoned".to_string())?;
        let system = self.system;
        let values = wf.get_output(system).map_err(|e| e.to_string())?;
        *self
            .result
            .lock()
            .map_err(|_| "result lock poisoned".to_string())? = Some(values);
        Ok(())
    }
}

#[test]
fn each_system_runs_as_one_dispatched_job() {
    let mut wf = Workflow::new();
    let (_wind, _rotor, drivetrain, _tower, summary) = turbine_like(&mut wf);
    assert_eq!(wf.get_output(summary).unwrap()["total"], Value::Scalar(56.0));

    let split = wf.split_workflow(&[drivetrain, summary]).unwrap();
    let workflow = Arc::new(Mutex::new(wf));
    let results: Vec<Arc<Mutex<Option<ValueMap>>>> = split
        .systems
        .iter()
        .map(|_| Arc::new(Mutex::new(None)))
        .collect();
    let jobs: Vec<SystemJob> = split
        .systems
        .iter()
        .zip(&results)
        .map(|(&system, result)| SystemJob {
            workflow: Arc::clone(&workflow),
            system,
            result: Arc::clone(result),
        })
        .collect();

    // Two jobs, pool of four: the direct path, one rank per job.
    let assignment = Dispatcher::new(4).execute(&mut JobList(jobs)).unwrap();
    assert_eq!(assignment.job_count(), 2);

    for result in &results {
        assert!(result.lock().unwrap().is_some());
    }
    // The second system's stand-ins were seeded from live values, so its
    // answer matches the unsplit run.
    let out_b = results[1].lock().unwrap().clone().unwrap();
    assert_eq!(out_b["total"], Value::Scalar(56.0));
}
