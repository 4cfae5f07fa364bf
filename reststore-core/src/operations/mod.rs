pub mod delete_resource;
pub mod expand_resources;
pub mod get_resource;
pub mod put_resource;

pub use delete_resource::{
    DeleteResourceOperation, DeleteResourceOperationOutcome, DeleteResourceOperationRequest,
};
pub use expand_resources::{
    ExpandResourcesOperation, ExpandResourcesOperationOutcome, ExpandResourcesOperationRequest,
};
pub use get_resource::{
    GetResourceOperation, GetResourceOperationOutcome, GetResourceOperationRequest,
};
pub use put_resource::{
    PutResourceOperation, PutResourceOperationOutcome, PutResourceOperationRequest,
};
