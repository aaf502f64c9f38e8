//! Master node state machine
//!
//! Every handler returns whether the next transition should follow immediately.  Handlers that
//! transmit always return `false` so the PHY gets to send before the state machine continues.
use crate::mstp::correlate::PduEnvelope;
use crate::mstp::handoff::{InboundFrame, ReceivedFrame};
use crate::mstp::station::MasterState;
use crate::mstp::{FrameType, MstpStation, SilenceTimer};
use crate::phy::MstpPhy;

impl<T: SilenceTimer> MstpStation<T> {
    fn set_master_state(&mut self, state: MasterState) {
        if self.master_state != state {
            log::trace!(
                "#{} master {:?} => {:?}",
                self.p.address,
                self.master_state,
                state
            );
        }
        self.master_state = state;
    }

    #[inline(always)]
    fn this_station(&self) -> crate::Address {
        self.p.address
    }

    /// Run one transition of the master node state machine.
    pub(crate) fn master_step<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        match self.master_state {
            MasterState::Initialize => self.do_initialize(),
            MasterState::Idle => self.do_idle(phy),
            MasterState::UseToken => self.do_use_token(phy),
            MasterState::WaitForReply => self.do_wait_for_reply(),
            MasterState::DoneWithToken => self.do_done_with_token(phy),
            MasterState::PassToken => self.do_pass_token(phy),
            MasterState::NoToken => self.do_no_token(phy),
            MasterState::PollForMaster => self.do_poll_for_master(phy),
            MasterState::AnswerDataRequest => self.do_answer_data_request(phy),
        }
    }

    fn do_initialize(&mut self) -> bool {
        let ts = self.this_station();
        self.ring.set_next_station(ts);
        self.ring.set_poll_station(ts);
        self.ring.token_count = self.p.poll_interval;
        self.ring.set_sole_master(false);
        self.set_master_state(MasterState::Idle);
        true
    }

    fn do_idle<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        match self.consumer.take() {
            Some(ReceivedFrame::Valid(frame)) => self.idle_handle_frame(phy, frame),
            Some(ReceivedFrame::NotForUs(header)) => {
                if header.frame_type == FrameType::Token {
                    self.ring.mark_master(header.source);
                }
                false
            }
            Some(ReceivedFrame::Invalid) => false,
            None => {
                if self.silence_ms() >= self.p.no_token_ms {
                    log::debug!(
                        "#{} saw no token for {}ms",
                        self.this_station(),
                        self.p.no_token_ms
                    );
                    self.consumer.clear_event_count();
                    self.stats.lost_tokens = self.stats.lost_tokens.wrapping_add(1);
                    self.set_master_state(MasterState::NoToken);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn idle_handle_frame<PHY: MstpPhy>(&mut self, phy: &mut PHY, frame: InboundFrame) -> bool {
        let ts = self.this_station();
        let for_us = frame.destination() == ts;
        match frame.frame_type() {
            FrameType::Token if for_us => {
                log::trace!("#{ts} received the token from #{}", frame.source());
                self.ring.mark_master(frame.source());
                self.ring.frame_count = 0;
                self.ring.set_sole_master(false);
                self.ring.set_in_ring();
                self.set_master_state(MasterState::UseToken);
                true
            }
            FrameType::PollForMaster if for_us => {
                self.ring.mark_master(frame.source());
                self.send_reply_to_poll_for_master(phy, frame.source());
                false
            }
            FrameType::DataNotExpectingReply => {
                self.deliver(frame);
                false
            }
            FrameType::DataExpectingReply if frame.header.is_broadcast() => {
                self.deliver(frame);
                false
            }
            FrameType::DataExpectingReply => {
                self.pending_request = Some(frame.clone());
                self.deliver(frame);
                self.set_master_state(MasterState::AnswerDataRequest);
                true
            }
            FrameType::TestRequest if for_us => {
                self.send_test_response(phy, frame.source(), &frame.data);
                false
            }
            t => {
                log::trace!("#{ts} ignores {t:?} from #{}", frame.source());
                false
            }
        }
    }

    fn do_use_token<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        let next = self.datalink.queue().next_to_send().cloned();
        let Some(pdu) = next else {
            // Nothing to send.
            self.ring.frame_count = self.p.max_info_frames;
            self.set_master_state(MasterState::DoneWithToken);
            return true;
        };

        self.send_pdu(phy, &pdu);
        self.ring.frame_count = self.ring.frame_count.saturating_add(1);

        let mut queue = self.datalink.queue();
        if pdu.expects_reply() {
            queue.mark_in_flight();
            drop(queue);
            self.set_master_state(MasterState::WaitForReply);
        } else {
            queue.pop();
            drop(queue);
            self.set_master_state(MasterState::DoneWithToken);
        }
        false
    }

    /// Remove the outstanding request from the queue, exactly once.
    fn finish_reply_wait(&mut self, reply: Option<&InboundFrame>) {
        let ts = self.this_station();
        let mut queue = self.datalink.queue();
        let answered = reply.and_then(|frame| {
            queue.take_request_answered_by(
                PduEnvelope {
                    source: frame.source(),
                    destination: frame.destination(),
                    pdu: &frame.data,
                },
                ts,
            )
        });
        if answered.is_none() {
            if let Some(frame) = reply {
                log::debug!(
                    "Reply from #{} does not match the outstanding request",
                    frame.source()
                );
            }
            queue.abandon_in_flight();
        }
    }

    fn do_wait_for_reply(&mut self) -> bool {
        let ts = self.this_station();
        match self.consumer.take() {
            Some(ReceivedFrame::Invalid) => {
                log::debug!("#{ts} received an invalid frame while waiting for a reply");
                self.finish_reply_wait(None);
                self.set_master_state(MasterState::DoneWithToken);
                true
            }
            Some(ReceivedFrame::Valid(frame)) if frame.destination() == ts => {
                match frame.frame_type() {
                    FrameType::ReplyPostponed => {
                        log::debug!("#{} postponed its reply", frame.source());
                        self.finish_reply_wait(None);
                        self.set_master_state(MasterState::DoneWithToken);
                    }
                    FrameType::TestResponse => {
                        self.finish_reply_wait(None);
                        self.set_master_state(MasterState::DoneWithToken);
                    }
                    FrameType::DataNotExpectingReply => {
                        self.finish_reply_wait(Some(&frame));
                        self.deliver(frame);
                        self.set_master_state(MasterState::DoneWithToken);
                    }
                    t => {
                        log::debug!("#{ts} received unexpected {t:?} while waiting for a reply");
                        self.finish_reply_wait(None);
                        self.set_master_state(MasterState::Idle);
                    }
                }
                true
            }
            Some(_) => {
                log::debug!("#{ts} received a frame for someone else while waiting for a reply");
                self.finish_reply_wait(None);
                self.set_master_state(MasterState::Idle);
                true
            }
            None => {
                if self.silence_ms() >= self.p.reply_timeout_ms {
                    log::debug!("#{ts} got no reply within {}ms", self.p.reply_timeout_ms);
                    self.ring.frame_count = self.p.max_info_frames;
                    self.finish_reply_wait(None);
                    self.set_master_state(MasterState::DoneWithToken);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn do_done_with_token<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        let ts = self.this_station();
        let ns = self.ring.next_station();
        let ps = self.ring.poll_station();

        if self.ring.frame_count < self.p.max_info_frames {
            // SendAnotherFrame
            self.set_master_state(MasterState::UseToken);
            return true;
        }

        if !self.ring.sole_master() && ns == ts {
            // NextStationUnknown
            let poll = self.p.next_address(ts);
            self.ring.set_poll_station(poll);
            self.send_poll_for_master(phy, poll);
            self.ring.retry_count = 0;
            self.set_master_state(MasterState::PollForMaster);
            return false;
        }

        if self.ring.token_count < self.p.poll_interval.saturating_sub(1) {
            if self.ring.sole_master() && ns != self.p.next_address(ts) {
                // SoleMaster: keep the token, there is nobody to pass it to.
                self.ring.frame_count = 0;
                self.ring.token_count += 1;
                self.set_master_state(MasterState::UseToken);
                true
            } else {
                // SendToken
                self.ring.token_count += 1;
                self.send_token(phy, ns);
                self.ring.retry_count = 0;
                self.consumer.clear_event_count();
                self.set_master_state(MasterState::PassToken);
                false
            }
        } else if self.p.next_address(ps) == ns {
            if self.ring.sole_master() {
                // SoleMasterRestartMaintenancePFM
                let poll = self.p.next_address(ns);
                self.ring.set_poll_station(poll);
                self.send_poll_for_master(phy, poll);
                self.ring.set_next_station(ts);
                self.ring.retry_count = 0;
                self.ring.token_count = 1;
                self.set_master_state(MasterState::PollForMaster);
            } else {
                // ResetMaintenancePFM
                self.ring.set_poll_station(ts);
                self.send_token(phy, ns);
                self.ring.retry_count = 0;
                self.ring.token_count = 1;
                self.consumer.clear_event_count();
                self.set_master_state(MasterState::PassToken);
            }
            false
        } else {
            // SendMaintenancePFM
            let poll = self.p.next_address(ps);
            self.ring.set_poll_station(poll);
            self.send_poll_for_master(phy, poll);
            self.ring.retry_count = 0;
            self.set_master_state(MasterState::PollForMaster);
            false
        }
    }

    fn do_pass_token<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        if self.silence_ms() <= self.p.usage_timeout_ms {
            if self.consumer.event_count() > u32::from(self.p.min_octets) {
                // SawTokenUser
                self.set_master_state(MasterState::Idle);
                return true;
            }
            return false;
        }

        let ns = self.ring.next_station();
        if self.ring.retry_count < self.p.token_retries {
            // RetrySendToken
            log::debug!("#{ns} did not use the token, retrying");
            self.ring.retry_count += 1;
            self.send_token(phy, ns);
            self.consumer.clear_event_count();
        } else {
            // FindNewSuccessor
            log::debug!("#{ns} did not use the token, searching for a new successor");
            let poll = self.p.next_address(ns);
            self.ring.set_poll_station(poll);
            self.send_poll_for_master(phy, poll);
            self.ring.set_next_station(self.this_station());
            self.ring.retry_count = 0;
            self.ring.token_count = 0;
            self.set_master_state(MasterState::PollForMaster);
        }
        false
    }

    fn do_no_token<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        let ts = self.this_station();
        let silence = self.silence_ms();

        if silence < self.p.token_generation_timeout_ms() {
            if self.consumer.event_count() > u32::from(self.p.min_octets) {
                // SawFrame
                self.set_master_state(MasterState::Idle);
                return true;
            }
            return false;
        }

        let own_slot_end = self.p.slot_end_ms(u32::from(ts) + 1);
        let all_slots_end = self.p.slot_end_ms(u32::from(self.p.max_master) + 1);
        if silence < own_slot_end || silence > all_slots_end {
            // GenerateToken
            if self.ring.in_ring() {
                log::warn!("Token lost! Generating a new one.");
            } else {
                log::info!("Generating new token due to silent bus.");
            }
            let poll = self.p.next_address(ts);
            self.ring.set_poll_station(poll);
            self.send_poll_for_master(phy, poll);
            self.ring.set_next_station(ts);
            self.ring.token_count = 0;
            self.ring.retry_count = 0;
            self.consumer.clear_event_count();
            self.set_master_state(MasterState::PollForMaster);
        }
        false
    }

    fn do_poll_for_master<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        let ts = self.this_station();
        match self.consumer.take() {
            Some(ReceivedFrame::Valid(frame))
                if frame.frame_type() == FrameType::ReplyToPollForMaster
                    && frame.destination() == ts =>
            {
                // ReceivedReplyToPFM
                let ns = frame.source();
                self.ring.mark_master(ns);
                self.ring.set_sole_master(false);
                self.ring.set_next_station(ns);
                self.consumer.clear_event_count();
                self.send_token(phy, ns);
                self.ring.set_poll_station(ts);
                self.ring.token_count = 0;
                self.ring.retry_count = 0;
                self.set_master_state(MasterState::PassToken);
                false
            }
            Some(ReceivedFrame::Valid(_)) | Some(ReceivedFrame::NotForUs(_)) => {
                // ReceivedUnexpectedFrame
                log::debug!("#{ts} received unexpected frame while polling for masters");
                self.set_master_state(MasterState::Idle);
                true
            }
            Some(ReceivedFrame::Invalid) => self.poll_for_master_done(phy),
            None => {
                if self.silence_ms() > self.p.usage_timeout_ms {
                    self.poll_for_master_done(phy)
                } else {
                    false
                }
            }
        }
    }

    /// No answer to the last Poll For Master.
    fn poll_for_master_done<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        let ts = self.this_station();
        let ns = self.ring.next_station();
        let ps = self.ring.poll_station();

        if self.ring.sole_master() {
            // SoleMaster
            self.ring.frame_count = 0;
            self.set_master_state(MasterState::UseToken);
            true
        } else if ns != ts {
            // DoneWithPFM
            self.consumer.clear_event_count();
            self.send_token(phy, ns);
            self.ring.retry_count = 0;
            self.set_master_state(MasterState::PassToken);
            false
        } else if self.p.next_address(ps) != ts {
            // SendNextPFM
            let poll = self.p.next_address(ps);
            self.ring.set_poll_station(poll);
            self.send_poll_for_master(phy, poll);
            self.ring.retry_count = 0;
            false
        } else {
            // DeclareSoleMaster
            self.ring.set_sole_master(true);
            self.ring.set_in_ring();
            self.ring.frame_count = 0;
            self.set_master_state(MasterState::UseToken);
            true
        }
    }

    fn do_answer_data_request<PHY: MstpPhy>(&mut self, phy: &mut PHY) -> bool {
        let ts = self.this_station();
        let Some(request) = self.pending_request.as_ref() else {
            self.set_master_state(MasterState::Idle);
            return true;
        };
        let requester = request.source();
        let reply = self.datalink.queue().take_reply_for(
            PduEnvelope {
                source: request.source(),
                destination: request.destination(),
                pdu: &request.data,
            },
            ts,
        );

        if let Some(reply) = reply {
            // Reply
            self.send_pdu(phy, &reply);
            self.pending_request = None;
            self.set_master_state(MasterState::Idle);
        } else if self.silence_ms() > self.p.reply_delay_ms {
            // DeferredReply
            self.send_reply_postponed(phy, requester);
            self.pending_request = None;
            self.set_master_state(MasterState::Idle);
        }
        false
    }
}
