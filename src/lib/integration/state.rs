use std::collections::HashMap;

use super::types::SetupStage;

/// Whether setup may move from `src` to `dst`. Any stage may short-circuit to
/// `Done` when a step fails.
pub fn valid_stage_transition(src: &SetupStage, dst: &SetupStage) -> bool {
    let transitions: HashMap<SetupStage, Vec<SetupStage>> = {
        let mut map = HashMap::new();
        map.insert(
            SetupStage::WaitReady,
            vec![SetupStage::InstallIfMissing, SetupStage::Done],
        );
        map.insert(
            SetupStage::InstallIfMissing,
            vec![SetupStage::EnableIfInactive, SetupStage::Done],
        );
        map.insert(
            SetupStage::EnableIfInactive,
            vec![SetupStage::TestConnectivity, SetupStage::Done],
        );
        map.insert(SetupStage::TestConnectivity, vec![SetupStage::Done]);
        map.insert(SetupStage::Done, vec![]);
        map
    };

    transitions
        .get(src)
        .is_some_and(|allowed| allowed.contains(dst))
}
