//! Mock ticket feed generator.
//!
//! Produces daily ticket exports in the feed's native column layout from a
//! fixed seed. The player population is drawn once; each generated day then
//! rolls participation and ticket counts per session from the player's
//! loyalty category.
//!
//! RULE: all randomness comes from `rng::RngBank`; the same seed and the
//! same call sequence write byte-identical files.

use std::{collections::HashSet, io::Write};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid};

use crate::{
    error::EngineResult,
    name_generator::{NameGenerator, PlayerName},
    parser::{COL_CONSENT, COL_CREATED, COL_DRAW, COL_MOBILE, COL_PLAYER_NAME, COL_TICKET},
    rng::{RngBank, Stream, StreamRng},
    types::Session,
};

pub const TICKET_PREFIX: &str = "787";
pub const TICKET_PRICE: &str = "GHS 3.00";
pub const COL_PRICE: &str = "PRICE";
const CREATED_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Tickets are bought up to this many minutes before the draw.
const PURCHASE_LEAD_MINUTES: u64 = 120;

const MOBILE_PREFIX: &str = "233";
const MOBILE_LOW: u64 = 200_000_000;
const MOBILE_HIGH: u64 = 599_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyCategory {
    HighlyLoyal,
    ModeratelyLoyal,
    Occasional,
    Inactive,
}

impl LoyaltyCategory {
    /// 20% highly loyal, 30% moderately loyal, 30% occasional, 20% inactive.
    fn from_roll(roll: f64) -> Self {
        if roll < 0.2 {
            Self::HighlyLoyal
        } else if roll < 0.5 {
            Self::ModeratelyLoyal
        } else if roll < 0.8 {
            Self::Occasional
        } else {
            Self::Inactive
        }
    }

    /// Probability of buying into a session's draw.
    pub fn participation(&self, session: Session) -> f64 {
        match (self, session) {
            (Self::HighlyLoyal, Session::Morning)     => 0.90,
            (Self::HighlyLoyal, Session::Evening)     => 0.95,
            (Self::ModeratelyLoyal, Session::Morning) => 0.65,
            (Self::ModeratelyLoyal, Session::Evening) => 0.75,
            (Self::Occasional, Session::Morning)      => 0.20,
            (Self::Occasional, Session::Evening)      => 0.25,
            (Self::Inactive, _)                       => 0.0,
        }
    }

    /// Inclusive ticket count range for one participating session.
    pub fn ticket_range(&self) -> (u64, u64) {
        match self {
            Self::HighlyLoyal     => (3, 5),
            Self::ModeratelyLoyal => (2, 3),
            Self::Occasional      => (1, 2),
            Self::Inactive        => (0, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockPlayer {
    pub mobile:              String,
    pub name:                PlayerName,
    pub promotional_consent: bool,
    pub category:            LoyaltyCategory,
}

/// One generated ticket, field for field as the feed writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct MockTicket {
    pub mobile:              String,
    pub draw_id:             Uuid,
    pub player_name:         String,
    pub ticket:              String,
    pub created:             NaiveDateTime,
    pub promotional_consent: bool,
    pub session:             Session,
}

/// Which sessions to generate for a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionDrop {
    #[default]
    None,
    /// Leave one session out, producing a partial cycle.
    Drop(Session),
}

impl SessionDrop {
    fn keeps(&self, session: Session) -> bool {
        !matches!(self, Self::Drop(s) if *s == session)
    }
}

pub struct MockGenerator {
    players:       Vec<MockPlayer>,
    participation: StreamRng,
    tickets:       StreamRng,
    draw_ids:      StreamRng,
}

impl MockGenerator {
    pub fn new(seed: u64, num_players: usize) -> Self {
        let bank = RngBank::new(seed);
        let mut population = bank.stream(Stream::Population);
        let players = generate_players(&mut population, num_players);
        Self {
            players,
            participation: bank.stream(Stream::Participation),
            tickets: bank.stream(Stream::Tickets),
            draw_ids: bank.stream(Stream::DrawIds),
        }
    }

    pub fn players(&self) -> &[MockPlayer] {
        &self.players
    }

    /// Draw time for a session: 14:30 and 20:30.
    pub fn draw_time(date: NaiveDate, session: Session) -> NaiveDateTime {
        let (h, m) = match session {
            Session::Morning => (14, 30),
            Session::Evening => (20, 30),
        };
        date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN))
    }

    /// One day of tickets, morning draw first.
    pub fn generate_day(&mut self, date: NaiveDate, drop: SessionDrop) -> Vec<MockTicket> {
        let mut out = Vec::new();
        let mut seen_tickets = HashSet::new();
        for session in Session::ALL {
            // Draw ids are rolled for both sessions so dropping one does not
            // shift later days.
            let draw_id = self.next_draw_id();
            if !drop.keeps(session) {
                continue;
            }
            let draw_at = Self::draw_time(date, session);
            for player in &self.players {
                if !self.participation.chance(player.category.participation(session)) {
                    continue;
                }
                let (lo, hi) = player.category.ticket_range();
                let count = self.tickets.between(lo, hi);
                for _ in 0..count {
                    let lead = self.tickets.below(PURCHASE_LEAD_MINUTES + 1) as i64;
                    out.push(MockTicket {
                        mobile: player.mobile.clone(),
                        draw_id,
                        player_name: player.name.display(),
                        ticket: next_ticket_number(&mut self.tickets, &mut seen_tickets),
                        created: draw_at - Duration::minutes(lead),
                        promotional_consent: player.promotional_consent,
                        session,
                    });
                }
            }
        }
        out
    }

    fn next_draw_id(&mut self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.draw_ids.fill_bytes(&mut bytes);
        Builder::from_random_bytes(bytes).into_uuid()
    }
}

fn generate_players(rng: &mut StreamRng, n: usize) -> Vec<MockPlayer> {
    let mut mobiles = HashSet::with_capacity(n);
    let mut players = Vec::with_capacity(n);
    while players.len() < n {
        let name = NameGenerator::generate(rng);
        let mobile = format!("{MOBILE_PREFIX}{}", rng.between(MOBILE_LOW, MOBILE_HIGH));
        if !mobiles.insert(mobile.clone()) {
            continue;
        }
        players.push(MockPlayer {
            mobile,
            name,
            promotional_consent: rng.chance(0.5),
            category: LoyaltyCategory::from_roll(rng.next_f64()),
        });
    }
    players
}

/// `787-` + nine digits + one capital letter, unique within the day.
fn next_ticket_number(rng: &mut StreamRng, seen: &mut HashSet<String>) -> String {
    loop {
        let digits = rng.below(1_000_000_000);
        let suffix = (b'A' + rng.below(26) as u8) as char;
        let ticket = format!("{TICKET_PREFIX}-{digits:09}{suffix}");
        if seen.insert(ticket.clone()) {
            return ticket;
        }
    }
}

/// Write tickets as a feed CSV. Returns the row count.
pub fn write_tickets_csv<W: Write>(tickets: &[MockTicket], out: W) -> EngineResult<usize> {
    let mut wtr = WriterBuilder::new().from_writer(out);
    wtr.write_record([
        COL_MOBILE,
        COL_DRAW,
        COL_PLAYER_NAME,
        COL_TICKET,
        COL_PRICE,
        COL_CREATED,
        COL_CONSENT,
    ])?;
    for t in tickets {
        wtr.write_record([
            t.mobile.as_str(),
            &t.draw_id.to_string(),
            t.player_name.as_str(),
            t.ticket.as_str(),
            TICKET_PRICE,
            &t.created.format(CREATED_FORMAT).to_string(),
            if t.promotional_consent { "Y" } else { "N" },
        ])?;
    }
    wtr.flush()?;
    Ok(tickets.len())
}

/// Conventional file name for a generated day: `tickets_YYYYMMDD.csv`.
pub fn daily_file_name(date: NaiveDate) -> String {
    format!("tickets_{}.csv", date.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn ticket_numbers_follow_feed_format() {
        let mut gen = MockGenerator::new(1, 50);
        let tickets = gen.generate_day(day(), SessionDrop::None);
        assert!(!tickets.is_empty());
        for t in &tickets {
            assert_eq!(t.ticket.len(), 14);
            assert!(t.ticket.starts_with("787-"));
            assert!(t.ticket[4..13].chars().all(|c| c.is_ascii_digit()));
            assert!(t.ticket.chars().last().unwrap().is_ascii_uppercase());
            assert!(t.mobile.starts_with("233") && t.mobile.len() == 12);
        }
    }

    #[test]
    fn tickets_land_before_their_draw() {
        let mut gen = MockGenerator::new(3, 40);
        for t in gen.generate_day(day(), SessionDrop::None) {
            let draw = MockGenerator::draw_time(day(), t.session);
            assert!(t.created <= draw);
            assert!(draw - t.created <= Duration::minutes(120));
        }
    }

    #[test]
    fn dropped_session_is_absent() {
        let mut gen = MockGenerator::new(5, 40);
        let tickets = gen.generate_day(day(), SessionDrop::Drop(Session::Morning));
        assert!(!tickets.is_empty());
        assert!(tickets.iter().all(|t| t.session == Session::Evening));
    }

    #[test]
    fn inactive_players_never_buy() {
        let mut gen = MockGenerator::new(11, 80);
        let inactive: HashSet<String> = gen
            .players()
            .iter()
            .filter(|p| p.category == LoyaltyCategory::Inactive)
            .map(|p| p.mobile.clone())
            .collect();
        let tickets = gen.generate_day(day(), SessionDrop::None);
        assert!(tickets.iter().all(|t| !inactive.contains(&t.mobile)));
    }
}
