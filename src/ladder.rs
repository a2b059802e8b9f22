// 🪜 Rank Ladder - thresholds → tiers → unlocked skills
//
// Each tier lists only the skills it INTRODUCES. Entitlement is the union of
// every tier at or below the player's lifetime score, so reaching a higher
// tier never revokes anything granted by a lower one.

use crate::error::LadderError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

// ============================================================================
// RANK TIER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTier {
    /// Stable tier id (e.g. "GOLD")
    pub id: String,

    /// Label shown to players; also used as the rarity of rank skills
    pub display_name: String,

    /// Minimum lifetime score required to hold this tier
    pub min_lifetime_score: i64,

    /// Skill codes introduced at this tier
    pub unlocked_skill_codes: Vec<String>,
}

impl RankTier {
    pub fn new(id: &str, display_name: &str, min_lifetime_score: i64, codes: &[&str]) -> Self {
        RankTier {
            id: id.to_string(),
            display_name: display_name.to_string(),
            min_lifetime_score,
            unlocked_skill_codes: codes.iter().map(|c| c.to_string()).collect(),
        }
    }
}

// ============================================================================
// RANK PROGRESS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankProgress {
    pub current: String,
    pub next: Option<String>,
    pub points_to_next: i64,
    /// 0.0 - 100.0
    pub percentage: f64,
    pub is_max_tier: bool,
}

// ============================================================================
// RANK LADDER
// ============================================================================

#[derive(Debug, Clone)]
pub struct RankLadder {
    /// Sorted ascending by threshold (validated on construction)
    tiers: Vec<RankTier>,
}

impl RankLadder {
    /// Build a ladder, enforcing a zero floor and strictly increasing thresholds.
    ///
    /// An empty list is accepted and simply entitles nobody to anything.
    pub fn new(mut tiers: Vec<RankTier>) -> Result<Self, LadderError> {
        tiers.sort_by_key(|t| t.min_lifetime_score);

        if let Some(floor) = tiers.first() {
            if floor.min_lifetime_score != 0 {
                return Err(LadderError::MissingFloor {
                    found: floor.min_lifetime_score,
                });
            }
        }

        let mut seen = HashSet::new();
        for (i, tier) in tiers.iter().enumerate() {
            if !seen.insert(tier.id.clone()) {
                return Err(LadderError::DuplicateTier(tier.id.clone()));
            }
            if i > 0 && tier.min_lifetime_score <= tiers[i - 1].min_lifetime_score {
                return Err(LadderError::NonIncreasing {
                    tier: tier.id.clone(),
                    threshold: tier.min_lifetime_score,
                    previous: tiers[i - 1].min_lifetime_score,
                });
            }
        }

        Ok(RankLadder { tiers })
    }

    pub fn tiers(&self) -> &[RankTier] {
        &self.tiers
    }

    /// Every skill code the score qualifies for (cumulative across tiers)
    pub fn resolve(&self, lifetime_high_score: i64) -> BTreeSet<String> {
        self.reached(lifetime_high_score)
            .flat_map(|tier| tier.unlocked_skill_codes.iter().cloned())
            .collect()
    }

    /// Highest tier reached by this score. Negative scores sit on the floor.
    pub fn tier_for(&self, lifetime_high_score: i64) -> Option<&RankTier> {
        self.reached(lifetime_high_score)
            .last()
            .or_else(|| self.tiers.first())
    }

    /// Progress from the current tier towards the next one
    pub fn progress(&self, lifetime_high_score: i64) -> Option<RankProgress> {
        let lifetime_high_score = lifetime_high_score.max(0);
        let current = self.tier_for(lifetime_high_score)?;
        let next = self
            .tiers
            .iter()
            .find(|t| t.min_lifetime_score > lifetime_high_score);

        let progress = match next {
            None => RankProgress {
                current: current.display_name.clone(),
                next: None,
                points_to_next: 0,
                percentage: 100.0,
                is_max_tier: true,
            },
            Some(next) => {
                let range = (next.min_lifetime_score - current.min_lifetime_score) as f64;
                let done = (lifetime_high_score - current.min_lifetime_score) as f64;
                RankProgress {
                    current: current.display_name.clone(),
                    next: Some(next.display_name.clone()),
                    points_to_next: next.min_lifetime_score - lifetime_high_score,
                    percentage: (done / range * 100.0).clamp(0.0, 100.0),
                    is_max_tier: false,
                }
            }
        };

        Some(progress)
    }

    fn reached(&self, score: i64) -> impl Iterator<Item = &RankTier> {
        self.tiers
            .iter()
            .take_while(move |t| t.min_lifetime_score <= score)
    }
}

impl Default for RankLadder {
    /// The production ladder: ten tiers from Novice to Sovereign Epic
    fn default() -> Self {
        let tiers = vec![
            RankTier::new("NOVICE", "Novice", 0, &[]),
            RankTier::new("BRONZE", "🥉 Bronze", 1000, &["VIP_CARD", "AULA_VIP", "GRUPO_VIP"]),
            RankTier::new(
                "SILVER",
                "🥈 Silver",
                1500,
                &["BAU_ENIGMAS", "AVALIACOES_RANK", "AJUDA_DIVINA"],
            ),
            RankTier::new(
                "GOLD",
                "🥇 Gold",
                2000,
                &["PRESENTE_ETE", "PRESENTE_TACA", "PRESENTE_AC", "PC_GOLD"],
            ),
            RankTier::new(
                "DIAMOND",
                "💎 Diamond",
                2500,
                &["PLANO_BRUXO", "PLANO_GAMIFICADO", "MINA_DIAMANTE", "SORTEIO_DIAMANTE"],
            ),
            RankTier::new(
                "EPIC",
                "👑 Epic",
                3000,
                &["TREINAMENTO", "REDUCAO_DANO", "AUREA_SABER", "BRINDE_EPICO", "INVISIBILIDADE_1"],
            ),
            RankTier::new(
                "LEGENDARY",
                "🌟 Legendary Epic",
                5000,
                &[
                    "CONVERTER_PC",
                    "IMUNIDADE_ATRASO",
                    "REDUCAO_DANO_2",
                    "GIL_HONORARIO",
                    "INVISIBILIDADE_2",
                    "ESSENCIA_SABER",
                    "TREINAMENTO_2",
                ],
            ),
            RankTier::new(
                "SUPREME",
                "🔥 Supreme Epic",
                10000,
                &["AJUDA_SUPREMA", "SORTUDO", "IMORTAL", "RENOMADO", "RESSUSCITAR", "ARREMATADOR"],
            ),
            RankTier::new(
                "MYTHIC",
                "🔱 Mythic Epic",
                20000,
                &[
                    "AJUDA_ILIMITADA",
                    "CAMPEAO",
                    "REDUCAO_ABSOLUTA",
                    "DOBRADOR",
                    "CONCEDER_RESSUSCITAR",
                    "PRESENTE_DEUSES",
                    "TRANSF_CONHECIMENTO",
                    "CIRCULO_CURA",
                ],
            ),
            RankTier::new(
                "SOVEREIGN",
                "⚡ Sovereign Epic",
                50000,
                &[
                    "AJUDA_SOBERANA",
                    "ARREMATADOR_75",
                    "GILBET_PREMIUM",
                    "TRIPLICADOR",
                    "PODER_FENIX",
                    "ROLETADA_GRATIS",
                    "ESSENCIA_FENIX",
                    "CANALIZADOR_MANA",
                    "PEDRA_FENIX",
                ],
            ),
        ];

        RankLadder { tiers }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_ladder() -> RankLadder {
        RankLadder::new(vec![
            RankTier::new("FLOOR", "Floor", 0, &[]),
            RankTier::new("SILVER", "Silver", 1000, &["X", "Y"]),
            RankTier::new("GOLD", "Gold", 2000, &["A", "B", "C"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_default_ladder_is_valid() {
        let default = RankLadder::default();
        let rebuilt = RankLadder::new(default.tiers().to_vec());
        assert!(rebuilt.is_ok());
        assert_eq!(default.tiers().len(), 10);
    }

    #[test]
    fn test_resolve_is_cumulative() {
        let ladder = small_ladder();

        assert!(ladder.resolve(0).is_empty());
        assert_eq!(ladder.resolve(1500).len(), 2);

        let gold: Vec<String> = ladder.resolve(2500).into_iter().collect();
        assert_eq!(gold, vec!["A", "B", "C", "X", "Y"]);
    }

    #[test]
    fn test_resolve_is_monotonic() {
        let ladder = RankLadder::default();
        let scores = [0, 999, 1000, 1999, 2000, 4999, 5000, 20000, 75000];

        for pair in scores.windows(2) {
            let lower = ladder.resolve(pair[0]);
            let higher = ladder.resolve(pair[1]);
            assert!(
                lower.is_subset(&higher),
                "entitlement shrank between {} and {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_empty_ladder_entitles_nothing() {
        let ladder = RankLadder::new(Vec::new()).unwrap();
        assert!(ladder.resolve(1_000_000).is_empty());
        assert!(ladder.tier_for(10).is_none());
        assert!(ladder.progress(10).is_none());
    }

    #[test]
    fn test_ladder_rejects_missing_floor() {
        let result = RankLadder::new(vec![RankTier::new("BRONZE", "Bronze", 1000, &[])]);
        assert!(matches!(result, Err(LadderError::MissingFloor { found: 1000 })));
    }

    #[test]
    fn test_ladder_rejects_equal_thresholds() {
        let result = RankLadder::new(vec![
            RankTier::new("FLOOR", "Floor", 0, &[]),
            RankTier::new("A", "A", 500, &[]),
            RankTier::new("B", "B", 500, &[]),
        ]);
        assert!(matches!(result, Err(LadderError::NonIncreasing { .. })));
    }

    #[test]
    fn test_tier_for_and_progress() {
        let ladder = small_ladder();

        assert_eq!(ladder.tier_for(2500).unwrap().id, "GOLD");
        assert_eq!(ladder.tier_for(1999).unwrap().id, "SILVER");
        assert_eq!(ladder.tier_for(-5).unwrap().id, "FLOOR");

        let progress = ladder.progress(1500).unwrap();
        assert_eq!(progress.next.as_deref(), Some("Gold"));
        assert_eq!(progress.points_to_next, 500);
        assert!((progress.percentage - 50.0).abs() < f64::EPSILON);

        let top = ladder.progress(9000).unwrap();
        assert!(top.is_max_tier);
        assert_eq!(top.points_to_next, 0);
        assert_eq!(top.percentage, 100.0);
    }

    #[test]
    fn test_progress_for_negative_score_starts_at_floor() {
        let ladder = small_ladder();

        let progress = ladder.progress(-5).unwrap();
        assert_eq!(progress.current, "Floor");
        assert_eq!(progress.next.as_deref(), Some("Silver"));
        assert_eq!(progress.points_to_next, 1000);
        assert_eq!(progress.percentage, 0.0);
    }
}
