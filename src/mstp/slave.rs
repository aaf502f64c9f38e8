//! Slave node state machine
//!
//! A slave never holds the token.  It only answers requests addressed to it.
use crate::mstp::correlate::PduEnvelope;
use crate::mstp::handoff::ReceivedFrame;
use crate::mstp::station::SlaveState;
use crate::mstp::{FrameType, MstpStation, SilenceTimer};
use crate::phy::MstpPhy;

impl<T: SilenceTimer> MstpStation<T> {
    fn set_slave_state(&mut self, state: SlaveState) {
        if self.slave_state != state {
            log::trace!(
                "#{} slave {:?} => {:?}",
                self.p.address,
                self.slave_state,
                state
            );
        }
        self.slave_state = state;
    }

    /// Run one transition of the slave node state machine.
    pub(crate) fn slave_step<PHY: MstpPhy>(&mut self, phy: &mut PHY) {
        match self.slave_state {
            SlaveState::Idle => self.do_slave_idle(phy),
            SlaveState::AnswerDataRequest => self.do_slave_answer_data_request(phy),
        }
    }

    fn do_slave_idle<PHY: MstpPhy>(&mut self, phy: &mut PHY) {
        let ts = self.p.address;
        let Some(ReceivedFrame::Valid(frame)) = self.consumer.take() else {
            return;
        };

        match frame.frame_type() {
            FrameType::DataExpectingReply if !frame.header.is_broadcast() => {
                self.pending_request = Some(frame.clone());
                self.deliver(frame);
                self.set_slave_state(SlaveState::AnswerDataRequest);
            }
            t if t.is_data() => {
                self.deliver(frame);
            }
            FrameType::TestRequest if frame.destination() == ts => {
                self.send_test_response(phy, frame.source(), &frame.data);
            }
            t => {
                log::trace!("Slave #{ts} ignores {t:?} from #{}", frame.source());
            }
        }
    }

    fn do_slave_answer_data_request<PHY: MstpPhy>(&mut self, phy: &mut PHY) {
        let ts = self.p.address;
        let Some(request) = self.pending_request.as_ref() else {
            self.set_slave_state(SlaveState::Idle);
            return;
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
            self.send_pdu(phy, &reply);
            self.pending_request = None;
            self.set_slave_state(SlaveState::Idle);
        } else if self.silence_ms() > self.p.reply_delay_ms {
            // A slave cannot postpone, the requester will time out.
            log::debug!("Slave #{ts} has no reply for #{requester} within T_reply_delay");
            self.pending_request = None;
            self.set_slave_state(SlaveState::Idle);
        }
    }
}
