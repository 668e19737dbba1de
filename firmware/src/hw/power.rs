//! Battery sense through ADC1 and the internal voltage reference.
//!
//! The battery sits behind a 2:1 divider on PA1. Each read first samples
//! VREFINT to recover the actual analog supply, then scales the divider
//! reading by it, so the result stays valid as the cell sags below the
//! regulator dropout.

use core::ptr;

use embassy_stm32::adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime, VrefInt};
use embassy_stm32::peripherals::ADC1;
use node_core::lifecycle::BatteryMonitor;

/// Factory-programmed calibration constant sampled at 3.0 V.
const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;

/// Supply voltage the calibration constant was taken at.
const VREFINT_CAL_VOLTS: f32 = 3.0;

const ADC_FULL_SCALE: f32 = 4095.0;

/// Battery volts per volt seen at the pin.
const DIVIDER_RATIO: f32 = 2.0;

/// Reads the factory-trimmed VREFINT calibration constant.
fn read_vrefint_calibration() -> u16 {
    // SAFETY: fixed, always-readable system memory address on STM32G0.
    unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) }
}

/// ADC wrapper producing battery voltages.
pub struct BatteryAdc<'d> {
    adc: Adc<'d, ADC1>,
    vrefint: VrefInt,
    sense: AnyAdcChannel<ADC1>,
    calibration: u16,
    discard_next: bool,
}

impl<'d> BatteryAdc<'d> {
    /// Enables the internal reference and binds the divider input.
    pub fn new(mut adc: Adc<'d, ADC1>, sense: impl AdcChannel<ADC1>) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        let vrefint = adc.enable_vrefint();
        Self {
            adc,
            vrefint,
            sense: sense.degrade_adc(),
            calibration: read_vrefint_calibration(),
            discard_next: true,
        }
    }

    fn analog_supply_volts(&mut self) -> f32 {
        if self.discard_next {
            let _ = self.adc.blocking_read(&mut self.vrefint);
            self.discard_next = false;
        }

        let raw = self.adc.blocking_read(&mut self.vrefint);
        if raw == 0 {
            return VREFINT_CAL_VOLTS;
        }
        VREFINT_CAL_VOLTS * f32::from(self.calibration) / f32::from(raw)
    }
}

impl BatteryMonitor for BatteryAdc<'_> {
    fn battery_volts(&mut self) -> f32 {
        let vdda = self.analog_supply_volts();
        let raw = self.adc.blocking_read(&mut self.sense);
        f32::from(raw) * vdda / ADC_FULL_SCALE * DIVIDER_RATIO
    }
}
