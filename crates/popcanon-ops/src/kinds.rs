//! Target-dialect operator kinds.

use popcanon_ir::NodeKind;

pub const ADD: NodeKind = NodeKind::popart("add");
pub const SUB: NodeKind = NodeKind::popart("sub");
pub const MUL: NodeKind = NodeKind::popart("mul");
pub const DIV: NodeKind = NodeKind::popart("div");
pub const POW: NodeKind = NodeKind::popart("pow");
pub const NEG: NodeKind = NodeKind::popart("neg");
pub const RELU: NodeKind = NodeKind::popart("relu");
pub const SIGMOID: NodeKind = NodeKind::popart("sigmoid");
pub const TANH: NodeKind = NodeKind::popart("tanh");
pub const EXP: NodeKind = NodeKind::popart("exp");
pub const LOG: NodeKind = NodeKind::popart("log");
pub const SQRT: NodeKind = NodeKind::popart("sqrt");
pub const ABS: NodeKind = NodeKind::popart("abs");
pub const IDENTITY: NodeKind = NodeKind::popart("identity");
pub const EQUAL: NodeKind = NodeKind::popart("equal");
pub const LESS: NodeKind = NodeKind::popart("less");
pub const GREATER: NodeKind = NodeKind::popart("greater");
pub const WHERE: NodeKind = NodeKind::popart("where");
pub const MATMUL: NodeKind = NodeKind::popart("matmul");
pub const SOFTMAX: NodeKind = NodeKind::popart("softmax");
pub const CAST: NodeKind = NodeKind::popart("cast");
pub const RESHAPE: NodeKind = NodeKind::popart("reshape");
pub const TRANSPOSE: NodeKind = NodeKind::popart("transpose");
pub const CONCAT: NodeKind = NodeKind::popart("concat");
pub const SPLIT: NodeKind = NodeKind::popart("split");
pub const FLATTEN: NodeKind = NodeKind::popart("flatten");
pub const SQUEEZE: NodeKind = NodeKind::popart("squeeze");
pub const UNSQUEEZE: NodeKind = NodeKind::popart("unsqueeze");
pub const EXPAND: NodeKind = NodeKind::popart("expand");
pub const SLICE: NodeKind = NodeKind::popart("slice");
pub const PAD: NodeKind = NodeKind::popart("pad");
pub const REDUCESUM: NodeKind = NodeKind::popart("reducesum");
pub const REDUCEMEAN: NodeKind = NodeKind::popart("reducemean");
pub const RANDOM_NORMAL: NodeKind = NodeKind::popart("randomnormal");
pub const RANDOM_UNIFORM: NodeKind = NodeKind::popart("randomuniform");
pub const L1_LOSS: NodeKind = NodeKind::popart("l1loss");

pub const TENSOR_CONSTANT: NodeKind = NodeKind::poptorch("tensor_constant");
pub const IDENTITY_LOSS: NodeKind = NodeKind::poptorch("identity_loss");
pub const SET_AVAILABLE_MEMORY: NodeKind = NodeKind::poptorch("set_available_memory");
pub const CUSTOM_OPERATION: NodeKind = NodeKind::poptorch("custom_operation");
pub const IPU_PRINT_TENSOR: NodeKind = NodeKind::poptorch("ipu_print_tensor");
pub const BEGIN_IPU_BLOCK: NodeKind = NodeKind::poptorch("begin_ipu_block");
pub const END_IPU_BLOCK: NodeKind = NodeKind::poptorch("end_ipu_block");

/// Source-dialect kinds the passes look for directly.
pub mod source {
    use popcanon_ir::NodeKind;

    pub const CONSTANT: NodeKind = NodeKind::prim("Constant");
    pub const LIST_CONSTRUCT: NodeKind = NodeKind::prim("ListConstruct");
    pub const LIST_UNPACK: NodeKind = NodeKind::prim("ListUnpack");
    pub const NUM_TO_TENSOR: NodeKind = NodeKind::prim("NumToTensor");
}
