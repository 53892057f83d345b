//! EngagementCloser: tally, select, publish and retire polls and giveaways.
//!
//! The store's compare-and-set on `is_active` is the single-payout gate.
//! Results are only published by the caller that won it, so concurrent
//! closes announce once.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Resolution, log_resolution};
use crate::error::{Result, WardenError};
use crate::ids::MemberId;
use crate::platform::{PlatformError, PlatformGate, Responses};
use crate::progression::ProgressionLedger;
use crate::selection;
use crate::store::{
    ChoiceTally, EngagementEvent, EngagementKind, EngagementOutcome, SqliteStore,
};

/// Closes engagements and rerolls giveaways.
pub struct EngagementCloser {
    gate: Arc<dyn PlatformGate>,
    store: Arc<SqliteStore>,
    ledger: Arc<ProgressionLedger>,
}

impl EngagementCloser {
    pub fn new(
        gate: Arc<dyn PlatformGate>,
        store: Arc<SqliteStore>,
        ledger: Arc<ProgressionLedger>,
    ) -> Self {
        Self { gate, store, ledger }
    }

    /// Close a due engagement from the sweep.
    pub async fn close_due(&self, event: &EngagementEvent) -> Result<Resolution> {
        let outcome = match self.tally(event).await {
            Ok(outcome) => outcome,
            Err(WardenError::Platform(e)) => {
                let resolution = Resolution::from_platform_error(&e);
                if resolution.is_deferred() {
                    log_resolution("engagement", event.id, resolution, &e.to_string());
                    return Ok(resolution);
                }
                // Departed entrants count as ineligible; only a missing
                // community surfaces here.
                EngagementOutcome::Vanished
            }
            Err(other) => return Err(other),
        };

        let resolution = if outcome == EngagementOutcome::Vanished {
            Resolution::Stale
        } else {
            Resolution::Applied
        };
        if self.finish(event, &outcome).await? {
            log_resolution("engagement", event.id, resolution, "closed");
        } else {
            debug!(engagement_id = event.id, "engagement was closed concurrently");
        }
        Ok(resolution)
    }

    /// Close an engagement on request. Errors if it is already closed or
    /// the platform cannot be read right now.
    pub async fn close_now(&self, id: i64) -> Result<EngagementOutcome> {
        let event = self
            .store
            .engagement(id)?
            .ok_or_else(|| WardenError::NotFound(format!("engagement {id}")))?;
        if !event.is_active {
            return Err(WardenError::AlreadyClosed(id));
        }
        let outcome = self.tally(&event).await?;
        if !self.finish(&event, &outcome).await? {
            return Err(WardenError::AlreadyClosed(id));
        }
        info!(engagement_id = id, "engagement closed on request");
        Ok(outcome)
    }

    /// Redraw giveaway winners.
    ///
    /// With `target`, exactly that winner's slot is redrawn from entrants who
    /// are not already winners. Without it, the whole winner set is redrawn
    /// from entrants excluding every prior winner.
    pub async fn reroll(&self, id: i64, target: Option<MemberId>) -> Result<Vec<MemberId>> {
        let event = self
            .store
            .engagement(id)?
            .ok_or_else(|| WardenError::NotFound(format!("engagement {id}")))?;
        if event.kind != EngagementKind::Giveaway {
            return Err(WardenError::Validation("only giveaways can be rerolled".into()));
        }
        if event.is_active {
            return Err(WardenError::Validation("giveaway has not ended yet".into()));
        }
        let prior = match &event.outcome {
            Some(EngagementOutcome::Giveaway { winners }) => winners.clone(),
            _ => {
                return Err(WardenError::Validation(
                    "giveaway has no recorded winners to reroll".into(),
                ));
            }
        };
        if let Some(target) = target
            && !prior.contains(&target)
        {
            return Err(WardenError::Validation(format!(
                "{target} is not among the winners"
            )));
        }

        let responses = self
            .gate
            .get_responses(event.channel, event.response_handle)
            .await?;
        let entrants = self.eligible_pool(&event, &responses).await?;
        let pool: Vec<MemberId> = entrants.into_iter().filter(|m| !prior.contains(m)).collect();
        if pool.is_empty() {
            return Err(WardenError::Validation(
                "no eligible entrants left to draw from".into(),
            ));
        }

        let winners = match target {
            Some(target) => {
                let Some(&replacement) = selection::select(&pool, 1).first() else {
                    return Err(WardenError::Validation(
                        "no eligible entrants left to draw from".into(),
                    ));
                };
                prior
                    .iter()
                    .map(|&w| if w == target { replacement } else { w })
                    .collect()
            }
            None => selection::select(&pool, event.entry.winner_count as usize),
        };

        self.store
            .replace_outcome(id, &EngagementOutcome::Giveaway { winners: winners.clone() })?;
        info!(engagement_id = id, ?target, "giveaway rerolled");

        let text = format!(
            "🔁 Reroll for **{}**: {}",
            event.prompt,
            mention_list(&winners)
        );
        if let Err(e) = self.gate.send_message(event.channel, &text).await {
            warn!(engagement_id = id, "reroll announcement failed: {e}");
        }
        Ok(winners)
    }

    /// Compute the outcome. `Vanished` when the response message is gone.
    async fn tally(&self, event: &EngagementEvent) -> Result<EngagementOutcome> {
        let responses = match self
            .gate
            .get_responses(event.channel, event.response_handle)
            .await
        {
            Ok(responses) => responses,
            Err(PlatformError::NotFound(_)) => return Ok(EngagementOutcome::Vanished),
            Err(e) => return Err(e.into()),
        };

        match event.kind {
            EngagementKind::Poll => Ok(EngagementOutcome::Poll {
                tallies: poll_tallies(event, &responses, self.gate.bot_id()),
            }),
            EngagementKind::Giveaway => {
                let pool = self.eligible_pool(event, &responses).await?;
                let winners = selection::select(&pool, event.entry.winner_count as usize);
                Ok(EngagementOutcome::Giveaway { winners })
            }
        }
    }

    /// Entrants satisfying the entry rules, in order of first response.
    async fn eligible_pool(
        &self,
        event: &EngagementEvent,
        responses: &Responses,
    ) -> Result<Vec<MemberId>> {
        let bot = self.gate.bot_id();
        let mut seen = HashSet::new();
        let mut pool = Vec::new();
        for choice in &event.choices {
            let Some(responders) = responses.get(&choice.marker) else {
                continue;
            };
            for &member in responders {
                if member == bot || !seen.insert(member) {
                    continue;
                }
                if self.is_eligible(event, member).await? {
                    pool.push(member);
                }
            }
        }
        Ok(pool)
    }

    async fn is_eligible(&self, event: &EngagementEvent, member: MemberId) -> Result<bool> {
        if let Some(min_level) = event.entry.min_level
            && self.ledger.level_of(event.community, member)? < min_level
        {
            return Ok(false);
        }
        if let Some(required) = event.entry.required_tag {
            match self.gate.get_member_tags(event.community, member).await {
                Ok(tags) => return Ok(tags.contains(&required)),
                // Left the community since entering.
                Err(PlatformError::NotFound(_)) => {
                    self.gate.community_name(event.community).await?;
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Persist the outcome, then publish it if this call closed it.
    async fn finish(&self, event: &EngagementEvent, outcome: &EngagementOutcome) -> Result<bool> {
        if !self.store.close_engagement(event.id, outcome)? {
            return Ok(false);
        }
        if *outcome != EngagementOutcome::Vanished {
            self.publish(event, outcome).await;
        }
        Ok(true)
    }

    async fn publish(&self, event: &EngagementEvent, outcome: &EngagementOutcome) {
        let text = results_text(event, outcome);
        let results = match self.gate.send_message(event.channel, &text).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(engagement_id = event.id, "results message failed: {e}");
                None
            }
        };

        let mut closed_prompt = format!("{}\n\n**This {} has ended.**", event.prompt, kind_label(event.kind));
        if let Some(results) = results {
            closed_prompt.push_str(&format!(
                " Results: {}",
                self.gate.message_link(event.community, event.channel, results)
            ));
        }
        if let Err(e) = self
            .gate
            .edit_message(event.channel, event.response_handle, &closed_prompt)
            .await
        {
            debug!(engagement_id = event.id, "prompt edit failed: {e}");
        }
        // Giveaway entries stay on the message; rerolls draw from them.
        if event.kind == EngagementKind::Poll
            && let Err(e) = self
                .gate
                .clear_responses(event.channel, event.response_handle)
                .await
        {
            debug!(engagement_id = event.id, "clearing responses failed: {e}");
        }
    }
}

/// Votes per choice, bot excluded. Zero total votes yields 0% everywhere.
pub(crate) fn poll_tallies(
    event: &EngagementEvent,
    responses: &Responses,
    bot: MemberId,
) -> Vec<ChoiceTally> {
    let votes: Vec<u64> = event
        .choices
        .iter()
        .map(|c| {
            responses
                .get(&c.marker)
                .map(|r| r.iter().filter(|&&m| m != bot).count() as u64)
                .unwrap_or_default()
        })
        .collect();
    let total: u64 = votes.iter().sum();
    event
        .choices
        .iter()
        .zip(votes)
        .map(|(choice, votes)| ChoiceTally {
            marker: choice.marker.clone(),
            label: choice.label.clone(),
            votes,
            percent: if total == 0 {
                0.0
            } else {
                votes as f64 / total as f64 * 100.0
            },
        })
        .collect()
}

fn kind_label(kind: EngagementKind) -> &'static str {
    match kind {
        EngagementKind::Poll => "poll",
        EngagementKind::Giveaway => "giveaway",
    }
}

fn mention_list(members: &[MemberId]) -> String {
    members
        .iter()
        .map(|m| m.mention())
        .collect::<Vec<_>>()
        .join(", ")
}

fn results_text(event: &EngagementEvent, outcome: &EngagementOutcome) -> String {
    match outcome {
        EngagementOutcome::Poll { tallies } => {
            let mut text = format!("📊 **Poll results:** {}\n", event.prompt);
            for t in tallies {
                text.push_str(&format!(
                    "{} {}: {} vote{} ({:.1}%)\n",
                    t.marker,
                    t.label,
                    t.votes,
                    if t.votes == 1 { "" } else { "s" },
                    t.percent
                ));
            }
            text
        }
        EngagementOutcome::Giveaway { winners } if winners.is_empty() => format!(
            "🎉 The giveaway **{}** has ended, but nobody eligible entered.",
            event.prompt
        ),
        EngagementOutcome::Giveaway { winners } => format!(
            "🎉 The giveaway **{}** has ended! Congratulations {}!",
            event.prompt,
            mention_list(winners)
        ),
        EngagementOutcome::Vanished => format!("The {} was removed.", kind_label(event.kind)),
    }
}
