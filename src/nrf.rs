use embassy_nrf::{Peri, bind_interrupts, peripherals::*, rng};
use nrf_sdc::mpsl::{self, MultiprotocolServiceLayer};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use static_cell::StaticCell;
use trouble_host::prelude::*;

bind_interrupts!(struct Irqs {
    RNG => rng::InterruptHandler<RNG>;
    EGU0_SWI0 => nrf_sdc::mpsl::LowPrioInterruptHandler;
    CLOCK_POWER => nrf_sdc::mpsl::ClockInterruptHandler;
    RADIO => nrf_sdc::mpsl::HighPrioInterruptHandler;
    TIMER0 => nrf_sdc::mpsl::HighPrioInterruptHandler;
    RTC0 => nrf_sdc::mpsl::HighPrioInterruptHandler;
});

#[embassy_executor::task]
async fn mpsl_task(mpsl: &'static MultiprotocolServiceLayer<'static>) -> ! {
    mpsl.run().await
}

const L2CAP_TXQ: u8 = 3;
const L2CAP_RXQ: u8 = 3;

fn build_sdc<'d, const N: usize>(
    p: nrf_sdc::Peripherals<'d>,
    rng: &'d mut rng::Rng<embassy_nrf::mode::Async>,
    mpsl: &'d MultiprotocolServiceLayer,
    mem: &'d mut nrf_sdc::Mem<N>,
) -> Result<nrf_sdc::SoftdeviceController<'d>, nrf_sdc::Error> {
    let builder = nrf_sdc::Builder::new()?
        .support_le_2m_phy()
        .support_peripheral()
        .support_phy_update_peripheral()
        .support_adv()
        .buffer_cfg(
            DefaultPacketPool::MTU as u16,
            DefaultPacketPool::MTU as u16,
            L2CAP_TXQ,
            L2CAP_RXQ,
        )?;

    builder.build(p, rng, mpsl, mem)
}

/// Peripherals handed over to the MPSL and the SoftDevice Controller.
pub struct BleResources<'p> {
    pub rtc0: Peri<'p, RTC0>,
    pub timer0: Peri<'p, TIMER0>,
    pub temp: Peri<'p, TEMP>,
    pub rng: Peri<'p, RNG>,
    pub ppi_ch17: Peri<'p, PPI_CH17>,
    pub ppi_ch18: Peri<'p, PPI_CH18>,
    pub ppi_ch19: Peri<'p, PPI_CH19>,
    pub ppi_ch20: Peri<'p, PPI_CH20>,
    pub ppi_ch21: Peri<'p, PPI_CH21>,
    pub ppi_ch22: Peri<'p, PPI_CH22>,
    pub ppi_ch23: Peri<'p, PPI_CH23>,
    pub ppi_ch24: Peri<'p, PPI_CH24>,
    pub ppi_ch25: Peri<'p, PPI_CH25>,
    pub ppi_ch26: Peri<'p, PPI_CH26>,
    pub ppi_ch27: Peri<'p, PPI_CH27>,
    pub ppi_ch28: Peri<'p, PPI_CH28>,
    pub ppi_ch29: Peri<'p, PPI_CH29>,
    pub ppi_ch30: Peri<'p, PPI_CH30>,
    pub ppi_ch31: Peri<'p, PPI_CH31>,
}

impl BleResources<'static> {
    /// The radio is the only consumer of peripherals in this firmware.
    pub fn take(p: embassy_nrf::Peripherals) -> Self {
        Self {
            rtc0: p.RTC0,
            timer0: p.TIMER0,
            temp: p.TEMP,
            rng: p.RNG,
            ppi_ch17: p.PPI_CH17,
            ppi_ch18: p.PPI_CH18,
            ppi_ch19: p.PPI_CH19,
            ppi_ch20: p.PPI_CH20,
            ppi_ch21: p.PPI_CH21,
            ppi_ch22: p.PPI_CH22,
            ppi_ch23: p.PPI_CH23,
            ppi_ch24: p.PPI_CH24,
            ppi_ch25: p.PPI_CH25,
            ppi_ch26: p.PPI_CH26,
            ppi_ch27: p.PPI_CH27,
            ppi_ch28: p.PPI_CH28,
            ppi_ch29: p.PPI_CH29,
            ppi_ch30: p.PPI_CH30,
            ppi_ch31: p.PPI_CH31,
        }
    }
}

/// Bring up MPSL and the controller.
///
/// Also returns the PRNG used for notification payloads, seeded from the
/// hardware RNG before the controller takes it over.
pub fn init_ble<'d>(
    p: BleResources<'static>,
    spawner: embassy_executor::Spawner,
) -> (nrf_sdc::SoftdeviceController<'d>, SmallRng) {
    let mpsl_p =
        mpsl::Peripherals::new(p.rtc0, p.timer0, p.temp, p.ppi_ch19, p.ppi_ch30, p.ppi_ch31);

    let lfclk_cfg = mpsl::raw::mpsl_clock_lfclk_cfg_t {
        source: mpsl::raw::MPSL_CLOCK_LF_SRC_RC as u8,
        rc_ctiv: mpsl::raw::MPSL_RECOMMENDED_RC_CTIV as u8,
        rc_temp_ctiv: mpsl::raw::MPSL_RECOMMENDED_RC_TEMP_CTIV as u8,
        accuracy_ppm: mpsl::raw::MPSL_DEFAULT_CLOCK_ACCURACY_PPM as u16,
        skip_wait_lfclk_started: mpsl::raw::MPSL_DEFAULT_SKIP_WAIT_LFCLK_STARTED != 0,
    };

    static MPSL: StaticCell<MultiprotocolServiceLayer> = StaticCell::new();
    static RNG: StaticCell<embassy_nrf::rng::Rng<'static, embassy_nrf::mode::Async>> =
        StaticCell::new();
    static SDC_MEM: StaticCell<nrf_sdc::Mem<4_096>> = StaticCell::new();

    let mpsl = MPSL.init(mpsl::MultiprotocolServiceLayer::new(mpsl_p, Irqs, lfclk_cfg).unwrap());
    spawner.spawn(mpsl_task(&*mpsl)).unwrap();

    let sdc_p = nrf_sdc::Peripherals::new(
        p.ppi_ch17, p.ppi_ch18, p.ppi_ch20, p.ppi_ch21, p.ppi_ch22, p.ppi_ch23, p.ppi_ch24,
        p.ppi_ch25, p.ppi_ch26, p.ppi_ch27, p.ppi_ch28, p.ppi_ch29,
    );

    let rng = RNG.init(rng::Rng::new(p.rng, Irqs));
    let mut seed = [0u8; 8];
    rng.blocking_fill_bytes(&mut seed);
    let payload_rng = SmallRng::seed_from_u64(u64::from_le_bytes(seed));

    let sdc_mem = SDC_MEM.init(nrf_sdc::Mem::<4_096>::new());

    (build_sdc(sdc_p, rng, mpsl, sdc_mem).unwrap(), payload_rng)
}
