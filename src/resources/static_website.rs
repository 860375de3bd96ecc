use std::collections::BTreeMap;

use super::*;
use crate::config::{AccessModel, FunctionCode, SiteConfig};
use crate::error::Result;
use crate::template::Template;

pub const BUCKET_ID: &str = "WebsiteBucket";
pub const BUCKET_POLICY_ID: &str = "WebsiteBucketPolicy";
pub const ORIGIN_ACCESS_CONTROL_ID: &str = "WebsiteOriginAccessControl";
pub const DISTRIBUTION_ID: &str = "WebsiteDistribution";
pub const RECORD_ID: &str = "WebsiteRecord";
pub const RECORD_IPV6_ID: &str = "WebsiteRecordIpv6";
pub const FUNCTION_ID: &str = "InvalidationFunction";
pub const FUNCTION_ROLE_ID: &str = "InvalidationFunctionRole";
pub const CI_ROLE_ID: &str = "GitHubActionsRole";
pub const OIDC_PROVIDER_ID: &str = "GitHubOidcProvider";
pub const CODE_KEY_PARAMETER: &str = "InvalidationFunctionCodeKey";

pub const WEBSITE_ORIGIN_ID: &str = "S3WebsiteOrigin";
pub const BUCKET_ORIGIN_ID: &str = "S3BucketOrigin";

/// the environment variable the invalidation function reads its target from.
pub const DISTRIBUTION_ENV_VAR: &str = "DISTRIBUTION_ID";

/// A bucket fronted by a CloudFront distribution under a custom domain,
/// optionally with a cache invalidation function and a CI deployment role.
pub struct StaticWebsite<'a> {
    conf: &'a SiteConfig,
    template: Template,
}

impl<'a> StaticWebsite<'a> {
    /// declares every resource the config asks for. The config should have
    /// been validated first, but resource level validation runs regardless.
    pub fn from_config(conf: &'a SiteConfig) -> Result<Template> {
        let description = match conf.access {
            AccessModel::Public => format!("Static website {} served from a public bucket", conf.site_name),
            AccessModel::OriginAccessControl => format!("Static website {} served from a private bucket", conf.site_name),
        };
        let mut site = StaticWebsite { conf, template: Template::new(&description) };
        site.add_storage()?;
        site.add_distribution()?;
        site.add_records()?;
        if site.conf.invalidation.is_some() {
            site.add_invalidation_function()?;
        }
        if site.conf.ci_role.is_some() {
            site.add_ci_role()?;
        }
        site.add_outputs();
        tracing::debug!(resources = site.template.resources.len(), "declared static website");
        Ok(site.template)
    }

    fn distribution(&self) -> DistributionRef {
        DistributionRef::new(DISTRIBUTION_ID)
    }

    fn add_storage(&mut self) -> Result<()> {
        let conf = self.conf;
        match conf.access {
            AccessModel::Public => {
                let website = WebsiteConfiguration {
                    index_document: conf.index_document.clone(),
                    error_document: conf.error_document.clone(),
                };
                self.template.add_resource(BUCKET_ID, &S3Bucket::public_website(&conf.bucket_name, website))?;
                let policy = BucketPolicy {
                    bucket: get_ref(BUCKET_ID),
                    policy_document: public_read_policy(&conf.bucket_name),
                };
                self.template.add_resource(BUCKET_POLICY_ID, &policy)?;
            }
            AccessModel::OriginAccessControl => {
                self.template.add_resource(BUCKET_ID, &S3Bucket::private(&conf.bucket_name))?;
                let mut name = format!("{}-oac", conf.stack_name);
                name.truncate(64);
                let oac = OriginAccessControl {
                    name,
                    description: format!("Signed access to {}", conf.bucket_name),
                };
                self.template.add_resource(ORIGIN_ACCESS_CONTROL_ID, &oac)?;
                let policy = BucketPolicy {
                    bucket: get_ref(BUCKET_ID),
                    policy_document: cloudfront_read_policy(&conf.bucket_name, self.distribution().arn()),
                };
                self.template.add_resource(BUCKET_POLICY_ID, &policy)?;
            }
        }
        Ok(())
    }

    fn add_distribution(&mut self) -> Result<()> {
        let conf = self.conf;
        let (origin, custom_error_responses) = match conf.access {
            AccessModel::Public => {
                // WebsiteURL is http://<endpoint>, the origin wants the bare host
                let host = select_split(2, "/", get_att(BUCKET_ID, "WebsiteURL"));
                (Origin::website_endpoint(WEBSITE_ORIGIN_ID, host), vec![])
            }
            AccessModel::OriginAccessControl => {
                let origin = Origin::signed_bucket(
                    BUCKET_ORIGIN_ID,
                    get_att(BUCKET_ID, "RegionalDomainName"),
                    get_att(ORIGIN_ACCESS_CONTROL_ID, "Id"),
                );
                // without s3:ListBucket a missing key comes back as 403
                let page = format!("/{}", conf.error_document);
                let errors = [403, 404].into_iter().map(|code| CustomErrorResponse {
                    error_code: code,
                    response_code: 404,
                    response_page_path: page.clone(),
                }).collect();
                (origin, errors)
            }
        };
        let target = origin.id.clone();
        let distribution = CloudfrontDistribution {
            distribution_config: DistributionConfig {
                enabled: true,
                comment: conf.site_name.clone(),
                default_root_object: conf.index_document.clone(),
                aliases: vec![conf.site_name.clone()],
                origins: vec![origin],
                default_cache_behavior: DefaultCacheBehavior::static_site(&target),
                viewer_certificate: ViewerCertificate::sni(&conf.acm_certificate),
                restrictions: (&conf.geo_restriction).into(),
                custom_error_responses,
                http_version: "http2".into(),
                ipv6_enabled: conf.ipv6,
            },
        };
        self.template.add_resource(DISTRIBUTION_ID, &distribution)?;
        Ok(())
    }

    fn add_records(&mut self) -> Result<()> {
        let conf = self.conf;
        let target = AliasTarget::distribution(&self.distribution());
        let record = Route53RecordSet::alias(&conf.hosted_zone_id, &conf.site_name, false, target.clone());
        self.template.add_resource(RECORD_ID, &record)?;
        if conf.ipv6 {
            let record = Route53RecordSet::alias(&conf.hosted_zone_id, &conf.site_name, true, target);
            self.template.add_resource(RECORD_IPV6_ID, &record)?;
        }
        Ok(())
    }

    fn add_invalidation_function(&mut self) -> Result<()> {
        let inv = match &self.conf.invalidation {
            Some(i) => i,
            None => return Ok(()),
        };
        let role = IamRole {
            managed_policy_arns: vec![BASIC_EXECUTION_POLICY_ARN.to_string()],
            ..IamRole::new(lambda_assume_role_policy())
        }.with_policy("invalidate-distribution", invalidation_policy(self.distribution().arn()));
        self.template.add_resource(FUNCTION_ROLE_ID, &role)?;

        let (code, runtime, handler) = match &inv.code {
            FunctionCode::Archive { artifact_bucket, runtime, handler } => {
                self.template.add_parameter(CODE_KEY_PARAMETER, "Object key of the invalidation function archive in the artifact bucket")?;
                let code = LambdaCode::S3 { bucket: artifact_bucket.clone(), key: get_ref(CODE_KEY_PARAMETER) };
                (code, runtime, handler)
            }
            FunctionCode::Inline { runtime, handler, source } => (LambdaCode::ZipFile(source.clone()), runtime, handler),
        };
        let function = LambdaFunction {
            function_name: inv.function_name.clone(),
            description: format!("Invalidates every path cached by the {} distribution", self.conf.site_name),
            runtime: runtime.clone(),
            handler: handler.clone(),
            architecture: inv.architecture.clone(),
            memory_size: inv.memory_size,
            timeout: inv.timeout,
            code,
            role: LambdaFunction::arn_of(FUNCTION_ROLE_ID),
            environment_variables: BTreeMap::from([(DISTRIBUTION_ENV_VAR.to_string(), self.distribution().id())]),
        };
        self.template.add_resource(FUNCTION_ID, &function)?;
        Ok(())
    }

    fn add_ci_role(&mut self) -> Result<()> {
        let ci = match &self.conf.ci_role {
            Some(c) => c,
            None => return Ok(()),
        };
        let provider_arn = if ci.create_oidc_provider {
            self.template.add_resource(OIDC_PROVIDER_ID, &OidcProvider::github(&ci.audience))?;
            // Ref of an OIDC provider is its arn
            get_ref(OIDC_PROVIDER_ID)
        } else {
            OidcProvider::existing_github_arn()
        };
        let function_arn = self.conf.invalidation.as_ref().map(|_| LambdaFunction::arn_of(FUNCTION_ID));
        let role = IamRole {
            role_name: ci.role_name.clone(),
            description: format!("Assumed by GitHub Actions in {} to deploy {}", ci.repository, self.conf.site_name),
            ..IamRole::new(github_trust_policy(provider_arn, &ci.audience, &ci.subject()))
        }.with_policy(
            "deploy-static-website",
            deployment_policy(&self.conf.bucket_name, self.distribution().arn(), function_arn),
        );
        self.template.add_resource(CI_ROLE_ID, &role)?;
        Ok(())
    }

    fn add_outputs(&mut self) {
        let conf = self.conf;
        let dist = self.distribution();
        let t = &mut self.template;
        t.add_output("WebsiteURL", "Public URL of the site", Value::String(format!("https://{}", conf.site_name)));
        t.add_output("CloudFrontDomain", "Domain name CloudFront assigned to the distribution", dist.domain_name());
        t.add_output("S3BucketName", "Bucket holding the site content", get_ref(BUCKET_ID));
        t.add_output("CloudFrontDistributionID", "Id of the distribution in front of the bucket", dist.id());
        if conf.access == AccessModel::Public {
            t.add_output("S3WebsiteURL", "Website endpoint of the public bucket", get_att(BUCKET_ID, "WebsiteURL"));
        }
        if conf.invalidation.is_some() {
            t.add_output("InvalidationFunctionARN", "Function that invalidates the distribution cache", LambdaFunction::arn_of(FUNCTION_ID));
        }
        if conf.ci_role.is_some() {
            t.add_output("GitHubActionsRoleARN", "Role assumed by the deployment workflow", get_att(CI_ROLE_ID, "Arn"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use serde_json::json;

    fn props<'t>(t: &'t Template, id: &str) -> &'t Value {
        &t.resource(id).unwrap().properties
    }

    #[test]
    fn public_site_with_ci_role() {
        let t = StaticWebsite::from_config(&public_with_ci_role()).unwrap();
        let ids: Vec<&str> = t.resources.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec![CI_ROLE_ID, BUCKET_ID, BUCKET_POLICY_ID, DISTRIBUTION_ID, RECORD_ID]);
        assert!(props(&t, BUCKET_ID).get("WebsiteConfiguration").is_some());
        assert_eq!(props(&t, BUCKET_POLICY_ID)["PolicyDocument"]["Statement"][0]["Resource"], json!(["arn:aws:s3:::jtc-site-bucket/*"]));
        let origin = &props(&t, DISTRIBUTION_ID)["DistributionConfig"]["Origins"][0];
        assert_eq!(origin["Id"], json!(WEBSITE_ORIGIN_ID));
        assert_eq!(origin["DomainName"], select_split(2, "/", get_att(BUCKET_ID, "WebsiteURL")));
        assert!(t.outputs.contains_key("S3WebsiteURL"));
        assert!(!t.outputs.contains_key("InvalidationFunctionARN"));
        assert!(t.parameters.is_empty());

        let trust = &props(&t, CI_ROLE_ID)["AssumeRolePolicyDocument"]["Statement"][0];
        assert_eq!(trust["Principal"]["Federated"], OidcProvider::existing_github_arn());
        assert_eq!(
            trust["Condition"]["StringEquals"]["token.actions.githubusercontent.com:sub"],
            json!("repo:trevorrobertsjr/jtc:ref:refs/heads/main")
        );
        // no function, so nothing to invoke
        let statements = props(&t, CI_ROLE_ID)["Policies"][0]["PolicyDocument"]["Statement"].as_array().unwrap().clone();
        assert!(statements.iter().all(|s| s["Action"] != json!(["lambda:InvokeFunction"])));
    }

    #[test]
    fn gated_site_with_invalidation() {
        let t = StaticWebsite::from_config(&gated_with_invalidation()).unwrap();
        assert!(props(&t, BUCKET_ID).get("WebsiteConfiguration").is_none());
        assert!(t.resource(ORIGIN_ACCESS_CONTROL_ID).is_some());
        assert!(t.resource(CI_ROLE_ID).is_none());
        let policy = &props(&t, BUCKET_POLICY_ID)["PolicyDocument"]["Statement"][0];
        assert_eq!(policy["Principal"], json!({ "Service": "cloudfront.amazonaws.com" }));

        let conf = &props(&t, DISTRIBUTION_ID)["DistributionConfig"];
        assert_eq!(conf["Origins"][0]["OriginAccessControlId"], get_att(ORIGIN_ACCESS_CONTROL_ID, "Id"));
        assert_eq!(conf["CustomErrorResponses"][0], json!({ "ErrorCode": 403, "ResponseCode": 404, "ResponsePagePath": "/error.html" }));

        let function = props(&t, FUNCTION_ID);
        assert_eq!(function["Environment"]["Variables"][DISTRIBUTION_ENV_VAR], get_ref(DISTRIBUTION_ID));
        assert_eq!(function["Code"]["S3Key"], get_ref(CODE_KEY_PARAMETER));
        assert!(t.parameters.contains_key(CODE_KEY_PARAMETER));
        assert!(!t.outputs.contains_key("S3WebsiteURL"));
        assert!(t.outputs.contains_key("InvalidationFunctionARN"));
    }

    #[test]
    fn ci_role_may_invoke_the_declared_function() {
        let t = StaticWebsite::from_config(&gated_with_everything()).unwrap();
        let statements = &props(&t, CI_ROLE_ID)["Policies"][0]["PolicyDocument"]["Statement"];
        assert_eq!(statements[1]["Resource"], json!([LambdaFunction::arn_of(FUNCTION_ID)]));
        assert!(t.outputs.contains_key("GitHubActionsRoleARN"));
    }

    #[test]
    fn every_revision_resolves_and_orders() {
        for conf in all_revisions() {
            let t = StaticWebsite::from_config(&conf).unwrap();
            let order = t.dependency_order().unwrap();
            let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
            assert!(pos(BUCKET_ID) < pos(DISTRIBUTION_ID));
            assert!(pos(DISTRIBUTION_ID) < pos(RECORD_ID));
            if conf.invalidation.is_some() {
                assert!(pos(DISTRIBUTION_ID) < pos(FUNCTION_ID));
            }
        }
    }

    #[test]
    fn synthesis_is_deterministic() {
        for conf in all_revisions() {
            let a = StaticWebsite::from_config(&conf).unwrap().to_json().unwrap();
            let b = StaticWebsite::from_config(&conf).unwrap().to_json().unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn ipv6_adds_an_aaaa_record() {
        let conf = SiteConfig { ipv6: true, ..valid_config() };
        let t = StaticWebsite::from_config(&conf).unwrap();
        assert_eq!(props(&t, RECORD_IPV6_ID)["Type"], json!("AAAA"));
        assert_eq!(props(&t, DISTRIBUTION_ID)["DistributionConfig"]["IPV6Enabled"], json!(true));
    }

    #[test]
    fn new_oidc_provider_is_referenced() {
        let mut conf = public_with_ci_role();
        if let Some(ci) = conf.ci_role.as_mut() {
            ci.create_oidc_provider = true;
        }
        let t = StaticWebsite::from_config(&conf).unwrap();
        assert!(t.resource(OIDC_PROVIDER_ID).is_some());
        assert!(t.references(CI_ROLE_ID).contains(OIDC_PROVIDER_ID));
    }
}
