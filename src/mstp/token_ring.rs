/// Management of the token ring from the station's point of view
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRing {
    /// Masters that were seen passing a token or answering a poll
    known_masters: bitvec::BitArr!(for 128),

    /// `TS` (This Station)
    this_station: crate::Address,

    /// `NS` (Next Station)
    ///
    /// The `next_station` is who we will forward the token to once we release it.
    ///
    /// There is always a `next_station`.  When no other master is known, we are our own
    /// `next_station`, so NS==TS.
    next_station: crate::Address,

    /// `PS` (Poll Station)
    ///
    /// The address to which the last Poll For Master was sent while searching for a successor or
    /// while looking for new masters in the gap between TS and NS.
    poll_station: crate::Address,

    /// Number of tokens received or used since the last maintenance poll
    pub(crate) token_count: u8,

    /// Number of data frames sent during the current token possession
    pub(crate) frame_count: u8,

    /// Number of retries of the current token pass or poll
    pub(crate) retry_count: u8,

    /// Whether this station believes to be the only master on the bus
    sole_master: bool,

    /// Whether this station ever held a token since the last reset
    in_ring: bool,
}

impl TokenRing {
    pub fn new(param: &crate::mstp::Parameters) -> Self {
        let mut known_masters = bitvec::array::BitArray::ZERO;
        if param.is_master() {
            // Mark ourselves in the list of masters.
            known_masters.set(usize::from(param.address), true);
        }

        Self {
            known_masters,
            this_station: param.address,
            next_station: param.address,
            poll_station: param.address,
            token_count: param.poll_interval,
            frame_count: 0,
            retry_count: 0,
            sole_master: false,
            in_ring: false,
        }
    }

    pub fn iter_known_masters(&self) -> impl Iterator<Item = crate::Address> + '_ {
        self.known_masters
            .iter_ones()
            // at most 127
            .map(|a| a as crate::Address)
    }

    pub(crate) fn mark_master(&mut self, address: crate::Address) {
        if let Some(mut bit) = self.known_masters.get_mut(usize::from(address)) {
            if !*bit {
                log::debug!("Discovered master #{address}.");
            }
            *bit = true;
        }
    }

    #[inline(always)]
    pub fn this_station(&self) -> crate::Address {
        self.this_station
    }

    #[inline(always)]
    pub fn next_station(&self) -> crate::Address {
        self.next_station
    }

    #[inline(always)]
    pub fn poll_station(&self) -> crate::Address {
        self.poll_station
    }

    #[inline(always)]
    pub fn sole_master(&self) -> bool {
        self.sole_master
    }

    #[inline(always)]
    pub fn in_ring(&self) -> bool {
        self.in_ring
    }

    pub(crate) fn set_next_station(&mut self, address: crate::Address) {
        if address != self.next_station && address != self.this_station {
            log::info!("New successor in the token ring: #{address}");
        }
        self.next_station = address;
    }

    pub(crate) fn set_poll_station(&mut self, address: crate::Address) {
        self.poll_station = address;
    }

    pub(crate) fn set_sole_master(&mut self, sole_master: bool) {
        if sole_master && !self.sole_master {
            log::info!("#{} is the sole master on the bus.", self.this_station);
        } else if !sole_master && self.sole_master {
            log::info!("#{} is no longer the sole master.", self.this_station);
        }
        self.sole_master = sole_master;
    }

    pub(crate) fn set_in_ring(&mut self) {
        self.in_ring = true;
    }
}

impl core::fmt::Debug for TokenRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenRing")
            .field("this_station", &self.this_station)
            .field("next_station", &self.next_station)
            .field("poll_station", &self.poll_station)
            .field("token_count", &self.token_count)
            .field("frame_count", &self.frame_count)
            .field("retry_count", &self.retry_count)
            .field("sole_master", &self.sole_master)
            .field(
                "known_masters",
                &self.iter_known_masters().collect::<Vec<_>>(),
            )
            .finish()
    }
}
