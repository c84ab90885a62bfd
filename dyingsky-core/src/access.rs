use tracing::{info, warn};

use crate::config::{Chapter, SiteConfig};
use crate::store::ReaderStore;

/// VIP unlock decision. A stored code on the allow-list unlocks every chapter, with no expiry.
#[derive(Debug, Clone)]
pub struct VipAccess {
    codes: Vec<String>,
}

impl VipAccess {
    pub fn new(codes: Vec<String>) -> Self {
        let codes = codes
            .into_iter()
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect();
        Self { codes }
    }

    pub fn from_config(config: &SiteConfig) -> Self {
        Self::new(config.vip_codes.clone())
    }

    fn accepts(&self, code: &str) -> bool {
        let code = code.trim();
        !code.is_empty() && self.codes.iter().any(|allowed| allowed == code)
    }

    pub fn is_unlocked(&self, store: &ReaderStore) -> bool {
        store.vip_code().is_some_and(|code| self.accepts(&code))
    }

    /// Stores `code` if it is on the allow-list. Rejected codes leave the store untouched.
    pub fn redeem(&self, store: &ReaderStore, code: &str) -> bool {
        if !self.accepts(code) {
            warn!("rejected VIP code");
            return false;
        }
        store.set_vip_code(code.trim());
        info!("VIP access unlocked");
        true
    }

    pub fn can_read(&self, chapter: &Chapter, store: &ReaderStore) -> bool {
        !chapter.locked || self.is_unlocked(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access() -> VipAccess {
        VipAccess::new(vec!["SKY-1".into(), "  SKY-2 ".into(), "".into()])
    }

    #[test]
    fn nothing_stored_means_locked() {
        let store = ReaderStore::in_memory();
        assert!(!access().is_unlocked(&store));
    }

    #[test]
    fn valid_code_unlocks_and_persists() {
        let store = ReaderStore::in_memory();
        assert!(access().redeem(&store, " SKY-2"));
        assert_eq!(store.vip_code().as_deref(), Some("SKY-2"));
        assert!(access().is_unlocked(&store));
    }

    #[test]
    fn invalid_code_is_not_stored() {
        let store = ReaderStore::in_memory();
        assert!(!access().redeem(&store, "sky-1"));
        assert!(!access().redeem(&store, ""));
        assert_eq!(store.vip_code(), None);
    }

    #[test]
    fn stale_code_no_longer_on_list_is_locked() {
        let store = ReaderStore::in_memory();
        store.set_vip_code("OLD-CODE");
        assert!(!access().is_unlocked(&store));
    }

    #[test]
    fn locked_chapters_need_vip() {
        let config = SiteConfig::builtin().unwrap();
        let store = ReaderStore::in_memory();
        let access = VipAccess::from_config(&config);
        let open = config.chapter(1).unwrap();
        let locked = config.chapters().iter().find(|c| c.locked).unwrap();

        assert!(access.can_read(open, &store));
        assert!(!access.can_read(locked, &store));
        assert!(access.redeem(&store, &config.vip_codes[0]));
        assert!(access.can_read(locked, &store));
    }
}
