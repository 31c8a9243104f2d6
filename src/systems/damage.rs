//! Damage apply phase - subtracts the merged per-target total once per
//! tick and starts the death path.

use crate::components::*;
use crate::config::SimConfig;
use crate::context::SimClock;
use crate::error::sim_invariant;
use crate::events::{EffectKind, SimEvent};
use crate::systems::combat::PendingDamage;
use crate::systems::spawn::SpawnTriggers;
use bevy_ecs::prelude::*;
use glam::Vec2;

/// System that applies the tick's damage ledger.
///
/// ## Data Access
/// - Reads: SimClock, SimConfig, Position, Heading, Incarnation
/// - Writes: Health, Lifecycle, PendingDamage, SpawnTriggers, SimEvent
/// - Deferred: insert `HitFlash`, insert `Defeated`, despawn collected pickups
///
/// Lethal actors move to `Dying` and lethal characters are marked
/// `Defeated`. A pickup at zero health is collected: its trigger is queued
/// for the next spawn phase and the pickup is removed. Non-lethal hits
/// flash, unless a flash is still running.
#[allow(clippy::type_complexity, clippy::too_many_arguments)]
pub fn damage_apply_system(
    mut commands: Commands,
    clock: Res<SimClock>,
    config: Res<SimConfig>,
    mut pending: ResMut<PendingDamage>,
    mut triggers: ResMut<SpawnTriggers>,
    mut events: EventWriter<SimEvent>,
    mut targets: Query<(
        &mut Health,
        &Position,
        Option<&Heading>,
        Option<&mut Lifecycle>,
        Option<&Incarnation>,
        Option<&Pickup>,
        Has<Character>,
        Has<Defeated>,
        Has<HitFlash>,
    )>,
) {
    if pending.0.is_empty() {
        return;
    }
    let now = clock.elapsed;

    for (entity, amount) in pending.0.drain_sorted() {
        let Ok((mut health, pos, heading, lifecycle, incarnation, pickup, is_character, defeated, flashing)) =
            targets.get_mut(entity)
        else {
            sim_invariant!(false, "damage for missing entity {:?}", entity);
            continue;
        };

        let live = match (lifecycle.as_deref(), pickup) {
            (Some(state), _) => state.is_live(),
            (None, Some(_)) => health.is_alive(),
            (None, None) => is_character && !defeated,
        };
        sim_invariant!(live, "damage for non-active entity {:?}", entity);
        if !live {
            continue;
        }

        health.damage(amount);
        let lethal = !health.is_alive();
        let incarnation = incarnation.map_or(0, |i| i.0);
        events.send(SimEvent::HealthChanged {
            entity,
            incarnation,
            value: health.current,
            lethal,
        });

        if lethal {
            match (lifecycle, pickup) {
                (Some(mut state), _) => {
                    tracing::debug!(?entity, from = state.name(), "actor died");
                    *state = Lifecycle::Dying {
                        release_at: now + config.teardown_delay,
                    };
                    events.send(SimEvent::LifecycleChanged {
                        entity,
                        incarnation,
                        state: LifecycleState::Dying,
                    });
                }
                (None, Some(pickup)) => {
                    tracing::debug!(?entity, trigger = ?pickup.trigger, "pickup collected");
                    triggers.0.push(pickup.trigger);
                    commands.entity(entity).despawn();
                    events.send(SimEvent::PickupCollected {
                        entity,
                        position: pos.0,
                        trigger: pickup.trigger,
                    });
                }
                (None, None) => {
                    tracing::info!(?entity, "character defeated");
                    commands.entity(entity).insert(Defeated);
                }
            }
        } else if !flashing {
            commands.entity(entity).insert(HitFlash { started_at: now });
            events.send(SimEvent::HitEffect {
                position: pos.0,
                heading: heading.map(|h| h.0).unwrap_or(Vec2::ZERO),
                effect: EffectKind::HitFlash,
            });
        }
    }
}
