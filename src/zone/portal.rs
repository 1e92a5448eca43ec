//! Portal proximity/level-gate validation (SPEC_FULL.md §4.6). The actual
//! cross-zone move is performed by [`super::ZoneRuntime::transition`]; this
//! module only answers "is this `transition` request currently legal".

use crate::config::ShardConfig;
use crate::entity::EntityKind;
use crate::error::ShardError;
use crate::ids::{EntityId, ZoneId};
use crate::math::Vec2;

use super::ZoneState;

/// Checks that `entity_id` is alive, in range of the named portal, and meets
/// its level requirement. Returns the destination zone and position on
/// success.
pub fn validate_portal_use(
    state: &ZoneState,
    config: &ShardConfig,
    entity_id: EntityId,
    portal_id: EntityId,
) -> Result<(ZoneId, Vec2), ShardError> {
    let entity = state
        .entities
        .get(&entity_id)
        .ok_or_else(|| ShardError::precondition("entity not found"))?;
    if !entity.is_alive() {
        return Err(ShardError::precondition("a dead entity cannot use a portal"));
    }
    let portal_entity = state
        .entities
        .get(&portal_id)
        .ok_or_else(|| ShardError::precondition("portal not found"))?;
    let EntityKind::Portal(portal) = &portal_entity.kind else {
        return Err(ShardError::precondition("target is not a portal"));
    };
    if entity.position.distance(portal_entity.position) > config.portal_range {
        return Err(ShardError::precondition("too far from the portal"));
    }
    let EntityKind::Player(player) = &entity.kind else {
        return Err(ShardError::precondition("only players may use portals"));
    };
    if player.level < portal.level_requirement {
        return Err(ShardError::precondition("level requirement not met"));
    }
    Ok((portal.dest_zone.clone(), portal.dest_pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, PlayerState, PortalState, Stats};
    use crate::ids::WalletId;

    fn zone_with_player_and_portal(distance: f64, level_req: u32, player_level: u32) -> (ZoneState, EntityId, EntityId) {
        let mut state = ZoneState::new(ZoneId::new("z"), 10, false);
        let mut player = PlayerState::new(WalletId("w".into()), "r".into(), "c".into(), Stats::default());
        player.level = player_level;
        let player_entity = Entity {
            id: EntityId::new(),
            name: "hero".into(),
            position: Vec2::ZERO,
            kind: EntityKind::Player(Box::new(player)),
        };
        let portal_entity = Entity {
            id: EntityId::new(),
            name: "portal".into(),
            position: Vec2::new(distance, 0.0),
            kind: EntityKind::Portal(PortalState {
                dest_zone: ZoneId::new("other"),
                dest_pos: Vec2::ZERO,
                level_requirement: level_req,
            }),
        };
        let player_id = player_entity.id;
        let portal_id = portal_entity.id;
        state.entities.insert(player_id, player_entity);
        state.entities.insert(portal_id, portal_entity);
        (state, player_id, portal_id)
    }

    #[test]
    fn out_of_range_is_rejected() {
        let (state, player_id, portal_id) = zone_with_player_and_portal(1000.0, 1, 1);
        let config = crate::config::test_config();
        let err = validate_portal_use(&state, &config, player_id, portal_id).unwrap_err();
        assert!(matches!(err, ShardError::Precondition { .. }));
    }

    #[test]
    fn under_level_requirement_is_rejected() {
        let (state, player_id, portal_id) = zone_with_player_and_portal(5.0, 50, 1);
        let config = crate::config::test_config();
        let err = validate_portal_use(&state, &config, player_id, portal_id).unwrap_err();
        assert!(matches!(err, ShardError::Precondition { .. }));
    }

    #[test]
    fn in_range_and_eligible_resolves_destination() {
        let (state, player_id, portal_id) = zone_with_player_and_portal(5.0, 1, 10);
        let config = crate::config::test_config();
        let (dest_zone, _pos) = validate_portal_use(&state, &config, player_id, portal_id).unwrap();
        assert_eq!(dest_zone, ZoneId::new("other"));
    }
}
