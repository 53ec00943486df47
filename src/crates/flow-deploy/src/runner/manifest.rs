//! Container-manifest backend: instead of spawning local processes, emits a
//! structured plan per pod and defers the actual orchestrator-specific YAML
//! (Kubernetes, Nomad, ...) to a pluggable [`ManifestRenderer`] — rendering
//! that YAML is explicitly out of scope (see SPEC_FULL.md §4.5 non-goal),
//! but the plan structure itself mirrors `get_deployment_yamls`'s inputs
//! closely enough that a renderer is a small, mechanical adapter to write.

use crate::error::Result;
use crate::planner::PodDeploymentPlan;

/// One pod's manifest, opaque to this crate beyond being a rendered string.
#[derive(Debug, Clone)]
pub struct ManifestPlan {
    pub pod: String,
    pub rendered: String,
}

/// Converts a [`PodDeploymentPlan`] into whatever textual form a target
/// orchestrator expects. `flow-deploy` ships [`JsonManifestRenderer`] as the
/// reference implementation; a Kubernetes/Nomad backend would implement
/// this trait instead of this crate growing template strings for each.
pub trait ManifestRenderer: Send + Sync {
    fn render(&self, plan: &PodDeploymentPlan) -> Result<String>;
}

/// Renders each plan as pretty-printed JSON. Useful for tests, local
/// inspection, and as a template for real renderers.
pub struct JsonManifestRenderer;

impl ManifestRenderer for JsonManifestRenderer {
    fn render(&self, plan: &PodDeploymentPlan) -> Result<String> {
        Ok(serde_json::to_string_pretty(plan)?)
    }
}

/// Render every plan with `renderer`, one [`ManifestPlan`] per pod.
pub fn render_all(plans: &[PodDeploymentPlan], renderer: &dyn ManifestRenderer) -> Result<Vec<ManifestPlan>> {
    plans
        .iter()
        .map(|plan| Ok(ManifestPlan { pod: plan.pod.clone(), rendered: renderer.render(plan)? }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::planner::DeploymentPlanner;
    use flow_core::compiler::FlowCompiler;
    use flow_core::config::FlowConfig;

    #[test]
    fn json_renderer_round_trips_pod_name() {
        let mut c = FlowCompiler::new(FlowConfig::default());
        c.add("encoder", None).unwrap();
        let graph = c.compile().unwrap();
        let plans = DeploymentPlanner::new(&graph, DeployConfig::default()).plan().unwrap();

        let rendered = render_all(&plans, &JsonManifestRenderer).unwrap();
        assert_eq!(rendered.len(), 1);
        assert!(rendered[0].rendered.contains("\"encoder\""));
    }
}
