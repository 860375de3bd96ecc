//! Declares a static website on AWS (bucket, CloudFront distribution,
//! Route 53 alias, and optionally a cache invalidation function and a
//! GitHub Actions deployment role) as a CloudFormation template, checks it,
//! and deploys it.

pub mod config;
pub mod deploy;
pub mod error;
pub mod package;
pub mod publish;
pub mod regions;
pub mod resources;
pub mod template;
pub mod validate;

#[cfg(test)]
mod testing;

pub use config::{AccessModel, SiteConfig};
pub use error::{Error, Result};
pub use resources::StaticWebsite;
pub use template::Template;
pub use validate::check_manifest;

/// builds the template for `conf` and runs the manifest checks on it.
pub fn synthesize(conf: &SiteConfig) -> Result<Template> {
    conf.validate()?;
    let template = StaticWebsite::from_config(conf)?;
    check_manifest(&template, conf)?;
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn synthesize_checks_config_first() {
        let mut conf = valid_config();
        conf.bucket_name = "Not_A_Bucket".into();
        assert!(matches!(synthesize(&conf), Err(Error::InvalidConfig(_))));
        for conf in all_revisions() {
            synthesize(&conf).unwrap();
        }
    }
}
