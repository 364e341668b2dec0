//! Lowering of lazy graph nodes into slot-based CPU programs.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use ltc_rs::backend::{
    BackendDataPtr, BackendError, BackendResult, Computation, ComputationPtr, LoweringContext,
    TensorSpec,
};
use ltc_rs::device::Device;
use ltc_rs::ir::{BinaryOp, NodeId, NodePtr, OpKind, UnaryOp};
use ltc_rs::tensor::DType;

/// Operation of one program instruction. Each instruction writes the slot equal to its index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuOp {
    Parameter(usize),
    Fill(f32),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Cast(DType),
    Uniform { low: f32, high: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuInstruction {
    pub op: CpuOp,
    pub inputs: Vec<usize>,
    pub spec: TensorSpec,
}

pub struct CpuComputation {
    name: String,
    instructions: Vec<CpuInstruction>,
    parameter_specs: Vec<TensorSpec>,
    result_specs: Vec<TensorSpec>,
    results: Vec<usize>,
    compiled: bool,
}

impl CpuComputation {
    pub fn instructions(&self) -> &[CpuInstruction] {
        &self.instructions
    }

    pub fn results(&self) -> &[usize] {
        &self.results
    }

    pub(crate) fn downcast(computation: &dyn Computation) -> BackendResult<&CpuComputation> {
        computation
            .as_any()
            .downcast_ref::<CpuComputation>()
            .ok_or_else(|| {
                BackendError::invalid_argument(format!(
                    "computation {} does not belong to the cpu backend",
                    computation.name()
                ))
            })
    }

    /// Validates slot references and returns the compiled copy.
    pub(crate) fn compiled(&self) -> BackendResult<CpuComputation> {
        for (slot, instruction) in self.instructions.iter().enumerate() {
            if let Some(&input) = instruction.inputs.iter().find(|&&input| input >= slot) {
                return Err(BackendError::invalid_argument(format!(
                    "instruction %{slot} reads slot %{input} before it is written"
                )));
            }
            if let CpuOp::Parameter(index) = instruction.op {
                if index >= self.parameter_specs.len() {
                    return Err(BackendError::invalid_argument(format!(
                        "instruction %{slot} reads parameter {index} of {}",
                        self.parameter_specs.len()
                    )));
                }
            }
        }
        if let Some(&slot) = self
            .results
            .iter()
            .find(|&&slot| slot >= self.instructions.len())
        {
            return Err(BackendError::invalid_argument(format!(
                "result slot %{slot} is out of range"
            )));
        }
        Ok(CpuComputation {
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            parameter_specs: self.parameter_specs.clone(),
            result_specs: self.result_specs.clone(),
            results: self.results.clone(),
            compiled: true,
        })
    }

    pub(crate) fn to_text(&self) -> String {
        let state = if self.compiled { "compiled" } else { "lowered" };
        let mut text = format!("computation {} ({state}) {{\n", self.name);
        for (slot, instruction) in self.instructions.iter().enumerate() {
            let inputs: Vec<String> = instruction.inputs.iter().map(|i| format!("%{i}")).collect();
            let op = match instruction.op {
                CpuOp::Parameter(index) => format!("parameter[{index}]"),
                CpuOp::Fill(value) => format!("fill[{value}]"),
                CpuOp::Unary(op) => format!("{op:?}").to_ascii_lowercase(),
                CpuOp::Binary(op) => format!("{op:?}").to_ascii_lowercase(),
                CpuOp::Cast(dtype) => format!("cast[{dtype:?}]"),
                CpuOp::Uniform { low, high } => format!("uniform[{low}, {high})"),
            };
            let _ = writeln!(
                text,
                "  %{slot} = {op}({}) : {:?}{}",
                inputs.join(", "),
                instruction.spec.dtype,
                instruction.spec.shape
            );
        }
        let results: Vec<String> = self.results.iter().map(|r| format!("%{r}")).collect();
        let _ = writeln!(text, "  return ({})", results.join(", "));
        text.push('}');
        text
    }
}

impl Computation for CpuComputation {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameter_specs(&self) -> &[TensorSpec] {
        &self.parameter_specs
    }

    fn result_specs(&self) -> &[TensorSpec] {
        &self.result_specs
    }

    fn is_compiled(&self) -> bool {
        self.compiled
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct CpuLoweringContext {
    name: String,
    device: Device,
    instructions: Vec<CpuInstruction>,
    slots: HashMap<NodeId, usize>,
    parameters: Vec<BackendDataPtr>,
    parameter_slots: HashMap<u64, usize>,
    results: Vec<usize>,
}

impl CpuLoweringContext {
    pub fn new(name: &str, device: Device) -> Self {
        CpuLoweringContext {
            name: name.to_string(),
            device,
            instructions: Vec::new(),
            slots: HashMap::new(),
            parameters: Vec::new(),
            parameter_slots: HashMap::new(),
            results: Vec::new(),
        }
    }

    fn push(&mut self, op: CpuOp, inputs: Vec<usize>, spec: TensorSpec) -> usize {
        self.instructions.push(CpuInstruction { op, inputs, spec });
        self.instructions.len() - 1
    }

    fn emit(&mut self, node: &NodePtr) -> BackendResult<usize> {
        if let Some(data) = node.data() {
            if let Some(&slot) = self.parameter_slots.get(&data.handle_id()) {
                return Ok(slot);
            }
            let handle = data.handle_id();
            let index = self.parameters.len();
            self.parameters.push(data);
            let slot = self.push(CpuOp::Parameter(index), Vec::new(), node.spec().clone());
            self.parameter_slots.insert(handle, slot);
            return Ok(slot);
        }
        let inputs = node
            .operands()
            .iter()
            .map(|operand| {
                self.slots.get(&operand.id()).copied().ok_or_else(|| {
                    BackendError::invalid_argument(format!(
                        "operand {} of {} was not lowered",
                        operand.id(),
                        node.id()
                    ))
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let op = match *node.op() {
            OpKind::DeviceData => {
                return Err(BackendError::invalid_argument(format!(
                    "device data node {} carries no data",
                    node.id()
                )))
            }
            OpKind::Fill { value } => CpuOp::Fill(value),
            OpKind::Unary(op) => CpuOp::Unary(op),
            OpKind::Binary(op) => CpuOp::Binary(op),
            OpKind::Cast(dtype) => CpuOp::Cast(dtype),
            OpKind::Uniform { low, high } => CpuOp::Uniform { low, high },
        };
        Ok(self.push(op, inputs, node.spec().clone()))
    }
}

impl LoweringContext for CpuLoweringContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn lower_node(&mut self, node: &NodePtr) -> BackendResult<()> {
        let mut stack: Vec<(NodePtr, bool)> = vec![(node.clone(), false)];
        while let Some((current, expanded)) = stack.pop() {
            if self.slots.contains_key(&current.id()) {
                continue;
            }
            if expanded || current.is_ready() || current.operands().is_empty() {
                let slot = self.emit(&current)?;
                self.slots.insert(current.id(), slot);
                continue;
            }
            let operands = current.operands().to_vec();
            stack.push((current, true));
            for operand in operands.into_iter().rev() {
                if !self.slots.contains_key(&operand.id()) {
                    stack.push((operand, false));
                }
            }
        }
        Ok(())
    }

    fn add_result(&mut self, node: &NodePtr) -> BackendResult<usize> {
        self.lower_node(node)?;
        let slot = self.slots[&node.id()];
        self.results.push(slot);
        Ok(self.results.len() - 1)
    }

    fn parameter_data(&self) -> Vec<BackendDataPtr> {
        self.parameters.clone()
    }

    fn build(self: Box<Self>) -> BackendResult<ComputationPtr> {
        let context = *self;
        let parameter_specs = context
            .parameters
            .iter()
            .map(|data| data.spec())
            .collect();
        let result_specs = context
            .results
            .iter()
            .map(|&slot| context.instructions[slot].spec.clone())
            .collect();
        Ok(Arc::new(CpuComputation {
            name: context.name,
            instructions: context.instructions,
            parameter_specs,
            result_specs,
            results: context.results,
            compiled: false,
        }))
    }
}
