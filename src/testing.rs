//! site declarations shared by the unit tests. The three revisions the
//! site went through are all expressible with the same config.

use crate::config::*;

pub const CERT: &str = "arn:aws:acm:us-east-1:123456789012:certificate/0000-1111";

pub fn valid_config() -> SiteConfig {
    let mut conf = SiteConfig {
        bucket_name: "jtc-site-bucket".into(),
        hosted_zone_id: "Z0123456789ABC".into(),
        acm_certificate: CERT.into(),
        site_name: "jtc.wanfooru.com".into(),
        ..Default::default()
    };
    conf.normalize();
    conf
}

pub fn ci_role() -> CiRoleConfig {
    CiRoleConfig {
        repository: "trevorrobertsjr/jtc".into(),
        ..Default::default()
    }
}

pub fn invalidation() -> InvalidationConfig {
    InvalidationConfig {
        code: FunctionCode::Archive {
            artifact_bucket: "jtc-artifacts".into(),
            runtime: "provided.al2023".into(),
            handler: "bootstrap".into(),
        },
        ..Default::default()
    }
}

/// public bucket + CI role
pub fn public_with_ci_role() -> SiteConfig {
    SiteConfig {
        ci_role: Some(ci_role()),
        ..valid_config()
    }
}

/// private bucket behind origin access control + invalidation function
pub fn gated_with_invalidation() -> SiteConfig {
    SiteConfig {
        access: AccessModel::OriginAccessControl,
        invalidation: Some(invalidation()),
        ..valid_config()
    }
}

/// private bucket + invalidation function + CI role
pub fn gated_with_everything() -> SiteConfig {
    SiteConfig {
        ci_role: Some(ci_role()),
        ..gated_with_invalidation()
    }
}

pub fn all_revisions() -> Vec<SiteConfig> {
    vec![public_with_ci_role(), gated_with_invalidation(), gated_with_everything()]
}
