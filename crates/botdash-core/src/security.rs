use std::{collections::HashSet, sync::Arc};

use crate::{
    domain::{GuildId, ManageableGuild, UserGuild},
    ports::PermissionSource,
    Result,
};

// ============== Capabilities ==============

/// Discord permission bit: ADMINISTRATOR.
const ADMINISTRATOR_BIT: u128 = 1 << 3;
/// Discord permission bit: MANAGE_GUILD.
const MANAGE_GUILD_BIT: u128 = 1 << 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Owner,
    Administrator,
    ManageGuild,
}

impl Capability {
    fn mask(self) -> u8 {
        match self {
            Capability::Owner => 0b001,
            Capability::Administrator => 0b010,
            Capability::ManageGuild => 0b100,
        }
    }
}

/// What the caller may do in one guild, derived once from Discord's raw fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn from_raw(owner: bool, permissions: u128) -> Self {
        let mut caps = Self::default();
        if owner {
            caps.0 |= Capability::Owner.mask();
        }
        if permissions & ADMINISTRATOR_BIT != 0 {
            caps.0 |= Capability::Administrator.mask();
        }
        if permissions & MANAGE_GUILD_BIT != 0 {
            caps.0 |= Capability::ManageGuild.mask();
        }
        caps
    }

    /// Discord's bitfield keeps growing past 64 bits, so it is parsed as `u128`.
    /// A permissions string that is not a decimal integer grants nothing.
    pub fn for_guild(guild: &UserGuild) -> Self {
        let permissions = guild.permissions.trim().parse::<u128>().unwrap_or(0);
        Self::from_raw(guild.owner, permissions)
    }

    pub fn contains(self, cap: Capability) -> bool {
        self.0 & cap.mask() != 0
    }

    pub fn can_manage(self) -> bool {
        self.contains(Capability::Owner)
            || self.contains(Capability::Administrator)
            || self.contains(Capability::ManageGuild)
    }
}

// ============== Access Verification ==============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// The caller is not a member of the guild.
    NotMember,
    /// The caller is a member without owner/admin/manage-guild.
    MissingPermissions,
    /// The bot has not been added to the guild.
    BotAbsent,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::NotMember => "not a member of this guild",
            DenyReason::MissingPermissions => "missing manage-guild permission",
            DenyReason::BotAbsent => "bot is not in this guild",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Authorized { guild_name: String },
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AccessDecision::Authorized { .. })
    }
}

/// Decides whether a caller may administer a guild's bot configuration.
///
/// Both upstream lists are fetched live on every call; nothing is cached and
/// nothing is retried here.
#[derive(Clone)]
pub struct AccessVerifier {
    source: Arc<dyn PermissionSource>,
}

impl AccessVerifier {
    pub fn new(source: Arc<dyn PermissionSource>) -> Self {
        Self { source }
    }

    pub async fn verify(&self, guild_id: &GuildId, access_token: &str) -> Result<AccessDecision> {
        let (user_guilds, bot_guilds) = self.fetch_both(access_token).await?;
        Ok(decide(guild_id, &user_guilds, &bot_guilds))
    }

    /// Every guild where the caller has management rights, whether or not the bot is there.
    pub async fn manageable_guilds(&self, access_token: &str) -> Result<Vec<ManageableGuild>> {
        let (user_guilds, bot_guilds) = self.fetch_both(access_token).await?;

        Ok(user_guilds
            .into_iter()
            .filter(|g| Capabilities::for_guild(g).can_manage())
            .map(|g| ManageableGuild {
                has_bot: bot_guilds.contains(&g.id),
                id: g.id,
                name: g.name,
                icon: g.icon,
            })
            .collect())
    }

    async fn fetch_both(
        &self,
        access_token: &str,
    ) -> Result<(Vec<UserGuild>, HashSet<GuildId>)> {
        let (user_guilds, bot_guilds) = tokio::join!(
            self.source.user_guilds(access_token),
            self.source.bot_guild_ids(),
        );
        Ok((user_guilds?, bot_guilds?))
    }
}

fn decide(
    guild_id: &GuildId,
    user_guilds: &[UserGuild],
    bot_guilds: &HashSet<GuildId>,
) -> AccessDecision {
    let Some(guild) = user_guilds.iter().find(|g| &g.id == guild_id) else {
        return AccessDecision::Denied(DenyReason::NotMember);
    };
    if !bot_guilds.contains(guild_id) {
        return AccessDecision::Denied(DenyReason::BotAbsent);
    }
    if !Capabilities::for_guild(guild).can_manage() {
        return AccessDecision::Denied(DenyReason::MissingPermissions);
    }
    AccessDecision::Authorized {
        guild_name: guild.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use async_trait::async_trait;

    struct FakeSource {
        user: Vec<UserGuild>,
        bot: Vec<&'static str>,
        fail_bot: bool,
    }

    #[async_trait]
    impl PermissionSource for FakeSource {
        async fn user_guilds(&self, _access_token: &str) -> Result<Vec<UserGuild>> {
            Ok(self.user.clone())
        }

        async fn bot_guild_ids(&self) -> Result<HashSet<GuildId>> {
            if self.fail_bot {
                return Err(Error::Upstream("bot guilds: 502".to_string()));
            }
            Ok(self.bot.iter().map(|id| gid(id)).collect())
        }
    }

    fn gid(raw: &str) -> GuildId {
        GuildId::parse(raw).unwrap()
    }

    fn guild(id: &str, owner: bool, permissions: &str) -> UserGuild {
        UserGuild {
            id: gid(id),
            name: format!("Guild {id}"),
            icon: None,
            owner,
            permissions: permissions.to_string(),
        }
    }

    fn verifier(user: Vec<UserGuild>, bot: Vec<&'static str>) -> AccessVerifier {
        AccessVerifier::new(Arc::new(FakeSource {
            user,
            bot,
            fail_bot: false,
        }))
    }

    #[test]
    fn capabilities_from_bits() {
        let caps = Capabilities::from_raw(false, 0x8);
        assert!(caps.contains(Capability::Administrator));
        assert!(!caps.contains(Capability::ManageGuild));
        assert!(caps.can_manage());

        let caps = Capabilities::from_raw(false, 0x20 | 0x400);
        assert!(caps.contains(Capability::ManageGuild));
        assert!(caps.can_manage());

        // SEND_MESSAGES | VIEW_CHANNEL only.
        assert!(!Capabilities::from_raw(false, 0x800 | 0x400).can_manage());
        assert!(Capabilities::from_raw(true, 0).contains(Capability::Owner));
    }

    #[test]
    fn permission_bits_beyond_64_still_parse() {
        // MANAGE_GUILD plus a bit above u64::MAX.
        let wide = ((1u128 << 70) | 0x20).to_string();
        let g = guild("1", false, &wide);
        assert!(Capabilities::for_guild(&g).contains(Capability::ManageGuild));
    }

    #[test]
    fn unparseable_permissions_grant_nothing() {
        let g = guild("1", false, "lots");
        assert_eq!(Capabilities::for_guild(&g), Capabilities::default());
    }

    #[tokio::test]
    async fn bot_absent_denies_every_bitmask() {
        for perms in ["0", "8", "32", "2147483647", "18446744073709551615"] {
            for owner in [false, true] {
                let v = verifier(vec![guild("5", owner, perms)], vec!["6"]);
                let d = v.verify(&gid("5"), "tok").await.unwrap();
                assert_eq!(d, AccessDecision::Denied(DenyReason::BotAbsent));
            }
        }
    }

    #[tokio::test]
    async fn owner_is_authorized_with_zero_bitmask() {
        let v = verifier(vec![guild("9", true, "0")], vec!["9"]);
        let d = v.verify(&gid("9"), "tok").await.unwrap();
        assert_eq!(
            d,
            AccessDecision::Authorized {
                guild_name: "Guild 9".to_string()
            }
        );
    }

    #[tokio::test]
    async fn member_without_manage_bits_is_denied_even_with_bot_present() {
        // VIEW_CHANNEL | SEND_MESSAGES
        let v = verifier(vec![guild("7", false, "3072")], vec!["7"]);
        let d = v.verify(&gid("7"), "tok").await.unwrap();
        assert_eq!(d, AccessDecision::Denied(DenyReason::MissingPermissions));
        assert!(!d.is_authorized());
    }

    #[tokio::test]
    async fn admin_and_manage_guild_are_authorized() {
        let v = verifier(
            vec![guild("1", false, "8"), guild("2", false, "32")],
            vec!["1", "2"],
        );
        assert!(v.verify(&gid("1"), "tok").await.unwrap().is_authorized());
        assert!(v.verify(&gid("2"), "tok").await.unwrap().is_authorized());
    }

    #[tokio::test]
    async fn unknown_guild_is_denied_not_an_error() {
        let v = verifier(vec![guild("1", true, "8")], vec!["1", "3"]);
        let d = v.verify(&gid("3"), "tok").await.unwrap();
        assert_eq!(d, AccessDecision::Denied(DenyReason::NotMember));
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        let v = AccessVerifier::new(Arc::new(FakeSource {
            user: vec![guild("1", true, "8")],
            bot: vec!["1"],
            fail_bot: true,
        }));
        let err = v.verify(&gid("1"), "tok").await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[tokio::test]
    async fn manageable_guilds_flags_bot_presence() {
        let v = verifier(
            vec![
                guild("1", true, "0"),
                guild("2", false, "32"),
                guild("3", false, "3072"),
            ],
            vec!["2"],
        );
        let list = v.manageable_guilds("tok").await.unwrap();
        let summary: Vec<(&str, bool)> = list.iter().map(|g| (g.id.as_str(), g.has_bot)).collect();
        assert_eq!(summary, vec![("1", false), ("2", true)]);
    }
}
