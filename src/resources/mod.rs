pub use serde_json::Value;

pub use crate::template::{get_att, get_ref, select_split, sub, CfnResource};

mod policy;
pub use policy::*;
mod s3_bucket;
pub use s3_bucket::*;
mod cloudfront;
pub use cloudfront::*;
mod route53;
pub use route53::*;
mod lambda;
pub use lambda::*;
mod iam;
pub use iam::*;

// higher level resources:
mod static_website;
pub use static_website::*;
