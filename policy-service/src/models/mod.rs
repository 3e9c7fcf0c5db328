pub mod condition;
pub mod policy;
pub mod transaction;

pub use condition::{
    AllOfNode, AnyOfNode, ConditionEntry, ConditionLeaf, ConditionNode, ConditionsNode,
    MAX_CONDITION_DEPTH, Operation, ValueType,
};
pub use policy::{AuthenticationPolicy, AuthenticationPolicyConfig, PolicyConditions};
pub use transaction::{
    method_of, AuthenticationTransaction, InteractionFilter, InteractionOutcome,
    InteractionRecord, RequestContext, TransactionFilter, TransactionStatus,
};
