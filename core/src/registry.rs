//! Player Registry: durable per-player state, staged per cycle.
//!
//! RULE: the registry never writes to the store. `PlayerRegistry::load`
//! takes a working copy of every player; the consolidator mutates the copy
//! and hands `into_changes()` to `Store::commit_cycle`, which writes it in
//! one transaction. Dropping the registry abandons the cycle.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::{
    aggregator::DailyFact,
    config::{CycleCalendar, EarlyWindowPolicy, EngineConfig},
    error::{EngineResult, OrderFault},
    scoring::{self, Scorecard},
    store::Store,
    types::{MobileNumber, Segment},
    window::RollingWindow,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub mobile:              MobileNumber,
    /// Names and consent are overwritten by the latest processed row; no
    /// history of earlier values is kept.
    pub last_name:           String,
    pub other_names:         String,
    pub promotional_consent: bool,
    pub created_at:          NaiveDateTime,
    pub e_score:             u64,
    pub last_processed_cycle: Option<NaiveDate>,
    window:                  RollingWindow,
    // Cache of scoring::segment/gear over `window`; refreshed on every
    // window mutation and never assigned on its own.
    segment:                 Segment,
    gear:                    u8,
}

impl Player {
    pub fn new(
        mobile: MobileNumber,
        last_name: String,
        other_names: String,
        promotional_consent: bool,
        created_at: NaiveDateTime,
        policy: EarlyWindowPolicy,
    ) -> Self {
        let window = RollingWindow::new();
        Self {
            mobile,
            last_name,
            other_names,
            promotional_consent,
            created_at,
            e_score: 0,
            last_processed_cycle: None,
            segment: scoring::segment(&window, policy),
            gear: scoring::gear(&window),
            window,
        }
    }

    /// Rebuild a player from persisted columns. Derived values are
    /// recomputed from the window; stored copies are not trusted.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        mobile: MobileNumber,
        last_name: String,
        other_names: String,
        promotional_consent: bool,
        created_at: NaiveDateTime,
        e_score: u64,
        window: RollingWindow,
        last_processed_cycle: Option<NaiveDate>,
        policy: EarlyWindowPolicy,
    ) -> Self {
        Self {
            mobile,
            last_name,
            other_names,
            promotional_consent,
            created_at,
            e_score,
            last_processed_cycle,
            segment: scoring::segment(&window, policy),
            gear: scoring::gear(&window),
            window,
        }
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    pub fn gear(&self) -> u8 {
        self.gear
    }

    pub fn scorecard(&self) -> Scorecard {
        Scorecard {
            e_score: self.e_score,
            segment: self.segment,
            gear:    self.gear,
        }
    }

    fn fold(&mut self, cycle: NaiveDate, fact: &DailyFact, policy: EarlyWindowPolicy) {
        self.window.push(fact.purchased());
        self.segment = scoring::segment(&self.window, policy);
        self.gear = scoring::gear(&self.window);
        self.e_score += fact.ticket_count;
        if let Some(latest) = &fact.latest {
            self.last_name = latest.last_name.clone();
            self.other_names = latest.other_names.clone();
            self.promotional_consent = latest.promotional_consent;
        }
        self.last_processed_cycle = Some(cycle);
    }
}

/// Staged registry writes for one cycle.
#[derive(Debug, Clone, Default)]
pub struct RegistryChanges {
    /// Every player whose state the cycle changed, in mobile order.
    pub players: Vec<Player>,
    pub created: Vec<MobileNumber>,
}

pub struct PlayerRegistry {
    players:  BTreeMap<MobileNumber, Player>,
    created:  BTreeSet<MobileNumber>,
    touched:  BTreeSet<MobileNumber>,
    /// Latest consolidated cycle at load time; the commit checks that it
    /// has not moved.
    base:     Option<NaiveDate>,
    policy:   EarlyWindowPolicy,
    calendar: CycleCalendar,
}

impl PlayerRegistry {
    pub fn load(store: &Store, config: &EngineConfig) -> EngineResult<Self> {
        let base = store.latest_consolidated_cycle()?;
        let players = store
            .all_players(config.early_window)?
            .into_iter()
            .map(|p| (p.mobile.clone(), p))
            .collect();
        Ok(Self::from_players(players, base, config))
    }

    pub fn empty(config: &EngineConfig) -> Self {
        Self::from_players(BTreeMap::new(), None, config)
    }

    fn from_players(
        players: BTreeMap<MobileNumber, Player>,
        base: Option<NaiveDate>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            players,
            created: BTreeSet::new(),
            touched: BTreeSet::new(),
            base,
            policy: config.early_window,
            calendar: config.calendar.clone(),
        }
    }

    pub fn base(&self) -> Option<NaiveDate> {
        self.base
    }

    pub(crate) fn len(&self) -> usize {
        self.players.len()
    }

    pub fn get(&self, mobile: &MobileNumber) -> Option<&Player> {
        self.players.get(mobile)
    }

    /// Players registered since load.
    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn mobiles(&self) -> Vec<MobileNumber> {
        self.players.keys().cloned().collect()
    }

    /// Existing player, or a fresh one with e_score 0 and an empty window.
    /// `created_at` is only used when the player is new.
    pub fn get_or_create(
        &mut self,
        mobile: &MobileNumber,
        last_name: &str,
        other_names: &str,
        promotional_consent: bool,
        created_at: NaiveDateTime,
    ) -> &Player {
        if !self.players.contains_key(mobile) {
            let player = Player::new(
                mobile.clone(),
                last_name.to_string(),
                other_names.to_string(),
                promotional_consent,
                created_at,
                self.policy,
            );
            self.players.insert(mobile.clone(), player);
            self.created.insert(mobile.clone());
            self.touched.insert(mobile.clone());
        }
        &self.players[mobile]
    }

    /// Fold one cycle's fact into a player.
    ///
    /// Fails without touching the player when `cycle` does not follow the
    /// player's last processed cycle. Unknown mobiles are a no-op returning
    /// `Ok(None)`; callers register players first.
    pub fn apply_cycle_fact(
        &mut self,
        mobile: &MobileNumber,
        cycle: NaiveDate,
        fact: &DailyFact,
    ) -> Result<Option<&Player>, OrderFault> {
        let Some(player) = self.players.get_mut(mobile) else {
            return Ok(None);
        };
        if let Some(last) = player.last_processed_cycle {
            if !self.calendar.follows(last, cycle) {
                return Err(OrderFault {
                    mobile: mobile.clone(),
                    last_processed: last,
                    expected: self.calendar.next_cycle_after(last),
                });
            }
        }
        player.fold(cycle, fact, self.policy);
        self.touched.insert(mobile.clone());
        Ok(Some(&*player))
    }

    pub fn into_changes(self) -> RegistryChanges {
        let Self { mut players, created, touched, .. } = self;
        RegistryChanges {
            players: touched
                .iter()
                .filter_map(|m| players.remove(m))
                .collect(),
            created: created.into_iter().collect(),
        }
    }

    /// All players in mobile order, for building a snapshot.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::LatestIdentity;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn mobile() -> MobileNumber {
        MobileNumber::normalize("0551234567", &EngineConfig::default_test().mobile).unwrap()
    }

    fn fact(tickets: u64, day: u32, name: &str) -> DailyFact {
        let at = d(day).and_hms_opt(14, 0, 0).unwrap();
        DailyFact {
            ticket_count: tickets,
            morning_tickets: tickets,
            evening_tickets: 0,
            first_seen: Some(at),
            latest: Some(LatestIdentity {
                seen_at: at,
                last_name: name.into(),
                other_names: "Kwame".into(),
                promotional_consent: true,
            }),
        }
    }

    #[test]
    fn new_player_starts_empty_and_keeps_created_at() {
        let config = EngineConfig::default_test();
        let mut reg = PlayerRegistry::empty(&config);
        let created = d(1).and_hms_opt(13, 30, 0).unwrap();
        let m = mobile();
        reg.get_or_create(&m, "Mensah", "Kwame", false, created);
        let again = reg.get_or_create(&m, "Other", "Name", true, d(2).and_hms_opt(9, 0, 0).unwrap());
        assert_eq!(again.created_at, created);
        assert_eq!(again.last_name, "Mensah");
        assert_eq!(again.e_score, 0);
        assert!(again.window().is_empty());
    }

    #[test]
    fn apply_fact_updates_score_window_and_identity() {
        let config = EngineConfig::default_test();
        let mut reg = PlayerRegistry::empty(&config);
        let m = mobile();
        reg.get_or_create(&m, "Mensah", "Kwame", false, d(1).and_hms_opt(13, 0, 0).unwrap());
        let p = reg.apply_cycle_fact(&m, d(1), &fact(2, 1, "Mensah-Owusu")).unwrap().unwrap();
        assert_eq!(p.e_score, 2);
        assert_eq!(p.window().to_vec(), vec![true]);
        assert_eq!(p.segment(), Segment::A);
        assert_eq!(p.gear(), 0);
        assert_eq!(p.last_name, "Mensah-Owusu");
        assert!(p.promotional_consent);
        assert_eq!(p.last_processed_cycle, Some(d(1)));
    }

    #[test]
    fn skipped_or_repeated_cycle_is_refused_without_mutation() {
        let config = EngineConfig::default_test();
        let mut reg = PlayerRegistry::empty(&config);
        let m = mobile();
        reg.get_or_create(&m, "Mensah", "Kwame", false, d(1).and_hms_opt(13, 0, 0).unwrap());
        reg.apply_cycle_fact(&m, d(1), &fact(2, 1, "Mensah")).unwrap();
        let before = reg.get(&m).cloned().unwrap();

        let fault = reg.apply_cycle_fact(&m, d(3), &fact(1, 3, "X")).unwrap_err();
        assert_eq!(fault.expected, d(2));
        assert_eq!(fault.last_processed, d(1));
        assert!(reg.apply_cycle_fact(&m, d(1), &fact(1, 1, "X")).is_err());
        assert_eq!(reg.get(&m).unwrap(), &before);
    }

    #[test]
    fn changes_list_only_touched_players() {
        let config = EngineConfig::default_test();
        let mut reg = PlayerRegistry::empty(&config);
        let m = mobile();
        reg.get_or_create(&m, "Mensah", "Kwame", false, d(1).and_hms_opt(13, 0, 0).unwrap());
        let changes = reg.into_changes();
        assert_eq!(changes.players.len(), 1);
        assert_eq!(changes.created, vec![m]);
    }
}
